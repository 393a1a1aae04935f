// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod config;
mod engine;
mod icon;
mod status_pane;
mod view;

use clap::Parser;
use config::AppConfig;
use eframe::egui;
use engine::tiles::StyleTiles;
use engine::{EguiMap, LngLat};
use log::{error, info, warn};
use ratings_client::RatingsClient;
use status_pane::StatusPane;
use view::loader::RatingsLoader;
use view::{EstablishmentMapView, MapViewConfig};

/// Map of nearby takeaways and their food hygiene ratings
#[derive(Parser, Debug)]
#[command(name = "takeaway-map", version, about)]
struct Args {
    /// Initial center latitude
    #[arg(long, allow_negative_numbers = true)]
    latitude: Option<f64>,

    /// Initial center longitude
    #[arg(long, allow_negative_numbers = true)]
    longitude: Option<f64>,

    /// Initial zoom level
    #[arg(long)]
    zoom: Option<f64>,

    /// Map provider access token (overrides env and config file)
    #[arg(long)]
    access_token: Option<String>,

    /// Map style reference or raster URL template with {z}/{x}/{y}
    #[arg(long)]
    style: Option<String>,

    /// Print the config file location and exit
    #[arg(long)]
    print_config_path: bool,
}

impl Args {
    fn apply(&self, config: &mut MapViewConfig) {
        if self.latitude.is_some() || self.longitude.is_some() {
            config.center = LngLat::new(
                self.longitude.unwrap_or(config.center.lng),
                self.latitude.unwrap_or(config.center.lat),
            );
        }
        if let Some(zoom) = self.zoom {
            config.zoom = zoom;
        }
        if let Some(ref token) = self.access_token {
            config.access_token = token.clone();
        }
        if let Some(ref style) = self.style {
            config.style = style.clone();
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.print_config_path {
        println!("{}", AppConfig::get_config_path()?.display());
        return Ok(());
    }

    let app_config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config: {}, using defaults", e);
        AppConfig::default()
    });
    let mut view_config = app_config.view_config();
    args.apply(&mut view_config);

    // Fail before opening a window if the style cannot be served
    if let Err(e) = StyleTiles::from_style(&view_config.style, &view_config.access_token) {
        error!("Cannot create map: {}", e);
        return Err(e.into());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("takeaway-io")
        .build()?;
    let handle = runtime.handle().clone();
    let client = RatingsClient::new(app_config.client_config());

    info!("Starting Takeaway Map...");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title("Takeaway Map"),
        ..Default::default()
    };

    eframe::run_native(
        "Takeaway Map",
        options,
        Box::new(move |cc| {
            let loader = RatingsLoader::new(client, handle).with_repaint(cc.egui_ctx.clone());
            Ok(Box::new(TakeawayMapApp::new(view_config, loader)))
        }),
    )?;

    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    Ok(())
}

struct TakeawayMapApp {
    view: EstablishmentMapView<EguiMap, RatingsLoader>,
    status_pane: StatusPane,
    mount_failed: bool,
}

impl TakeawayMapApp {
    fn new(config: MapViewConfig, loader: RatingsLoader) -> Self {
        Self {
            view: EstablishmentMapView::new(config, loader),
            status_pane: StatusPane::default(),
            mount_failed: false,
        }
    }
}

impl eframe::App for TakeawayMapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.view.is_mounted() && !self.mount_failed {
            let egui_ctx = ctx.clone();
            if let Err(e) = self.view.mount(|options| EguiMap::new(egui_ctx, options)) {
                error!("Failed to create map: {}", e);
                self.mount_failed = true;
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                return;
            }
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                self.view.show(ui);
            });

        self.status_pane.render(ctx, self.view.status());
    }
}
