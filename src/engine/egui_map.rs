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

//! egui map engine.
//!
//! Immediate-mode renderer behind [`MapEngine`]. Call [`EguiMap::show`] once
//! per frame; it paints tiles, layers, the popup and controls, handles
//! pan/zoom input, and queues events for the owner to drain afterwards.
//! Hit testing for [`MapEngine::query_rendered_features`] uses the shapes
//! painted in the most recent frame.

use std::collections::HashMap;

use egui::{Align2, Color32, FontId, Pos2, Rect, Stroke, TextureHandle, Vec2};
use log::{debug, info};
use ratings_client::FeatureCollection;

use super::cluster::{abbreviate_count, ClusterId, ClusterIndex, IndexEntry};
use super::projection::{constrain_camera, visible_bounds, WebMercator};
use super::tiles::{self, StyleTiles, TileManager};
use super::{
    CameraOptions, Control, Cursor, EngineError, EventKind, GeoJsonSource, IconImage, LayerFilter,
    LayerKind, LayerSpec, LngLat, LngLatBounds, MapEngine, MapEvent, MapOptions, Popup,
    RenderedFeature, RenderedProperties, ScreenPoint, Subscription, SubscriptionId, TextAnchor,
    TextField,
};

const MIN_ZOOM: f64 = 0.0;
const MAX_ZOOM: f64 = 22.0;
const EASE_SECONDS: f64 = 0.5;
/// Extra margin so features straddling the viewport edge are still drawn.
const CULL_MARGIN_PX: f64 = 64.0;
const BACKGROUND: Color32 = Color32::from_rgb(200, 220, 240);

struct Source {
    data: FeatureCollection,
    index: ClusterIndex,
}

struct Ease {
    from_center: LngLat,
    to_center: LngLat,
    from_zoom: f64,
    to_zoom: f64,
    start: f64,
}

enum HitShape {
    Circle { center: Pos2, radius: f32 },
    Rect(Rect),
}

impl HitShape {
    fn contains(&self, pos: Pos2) -> bool {
        match self {
            HitShape::Circle { center, radius } => center.distance(pos) <= *radius,
            HitShape::Rect(rect) => rect.contains(pos),
        }
    }
}

struct Hit {
    feature: RenderedFeature,
    shape: HitShape,
}

/// Screen placement of the open popup from the last frame.
struct PopupFrame {
    body: Rect,
    close: Rect,
}

pub struct EguiMap {
    ctx: egui::Context,
    tiles: TileManager,
    center: LngLat,
    zoom: f64,
    max_bounds: Option<LngLatBounds>,
    viewport: Vec2,
    origin: Pos2,
    resize_pending: bool,
    controls: Vec<Control>,
    sources: HashMap<String, Source>,
    layers: Vec<LayerSpec>,
    images: HashMap<String, TextureHandle>,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
    events: Vec<MapEvent>,
    hover: HashMap<String, bool>,
    loaded: bool,
    ease: Option<Ease>,
    cursor: Cursor,
    popup: Option<Popup>,
    popup_frame: Option<PopupFrame>,
    hits: Vec<Hit>,
    tile_error: Option<String>,
    destroyed: bool,
}

impl std::fmt::Debug for EguiMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EguiMap")
            .field("center", &self.center)
            .field("zoom", &self.zoom)
            .field("layers", &self.layers.len())
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl EguiMap {
    /// Create an engine for the given style. Fails if the style needs an
    /// access token and none was supplied.
    pub fn new(ctx: egui::Context, options: MapOptions) -> Result<Self, EngineError> {
        let source = StyleTiles::from_style(&options.style, &options.access_token)?;
        tiles::describe(&source);

        info!(
            "Map engine created at {:.4},{:.4} zoom {:.1}",
            options.center.lat, options.center.lng, options.zoom
        );

        Ok(Self {
            ctx,
            tiles: TileManager::new(source),
            center: options.center,
            zoom: options.zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            max_bounds: None,
            viewport: Vec2::ZERO,
            origin: Pos2::ZERO,
            resize_pending: true,
            controls: Vec::new(),
            sources: HashMap::new(),
            layers: Vec::new(),
            images: HashMap::new(),
            subscriptions: Vec::new(),
            next_subscription: 1,
            events: Vec::new(),
            hover: HashMap::new(),
            loaded: false,
            ease: None,
            cursor: Cursor::Default,
            popup: None,
            popup_frame: None,
            hits: Vec::new(),
            tile_error: None,
            destroyed: false,
        })
    }

    /// Paint the map into all available space and process input.
    pub fn show(&mut self, ui: &mut egui::Ui) -> egui::Response {
        let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let rect = response.rect;
        painter.rect_filled(rect, 0.0, BACKGROUND);

        if self.destroyed {
            return response;
        }

        if self.resize_pending || self.viewport != rect.size() {
            self.viewport = rect.size();
            self.resize_pending = false;
        }
        self.origin = rect.min;

        self.handle_input(ui, &response);
        self.step_ease();
        self.apply_bounds();

        self.draw_tiles(&painter, rect);
        self.hits.clear();
        self.draw_layers(&painter, rect);
        self.popup_frame = self.draw_popup(&painter, rect);
        let control_clicked = self.draw_controls(ui, rect);
        self.draw_status(&painter, rect);

        self.emit_events(&response, control_clicked);

        if response.hovered() {
            ui.ctx().set_cursor_icon(match self.cursor {
                Cursor::Default if response.dragged() => egui::CursorIcon::Grabbing,
                Cursor::Default => egui::CursorIcon::Default,
                Cursor::Pointer => egui::CursorIcon::PointingHand,
            });
        }

        response
    }

    fn to_screen(&self, point: LngLat, rect: Rect) -> Pos2 {
        let (x, y) = WebMercator::project(point, self.zoom);
        let (cx, cy) = WebMercator::project(self.center, self.zoom);
        rect.center() + Vec2::new((x - cx) as f32, (y - cy) as f32)
    }

    fn from_screen(&self, pos: Pos2, rect: Rect) -> LngLat {
        let (cx, cy) = WebMercator::project(self.center, self.zoom);
        let offset = pos - rect.center();
        WebMercator::unproject(cx + f64::from(offset.x), cy + f64::from(offset.y), self.zoom)
    }

    fn handle_input(&mut self, ui: &egui::Ui, response: &egui::Response) {
        let rect = response.rect;

        if response.dragged() {
            let delta = response.drag_delta();
            let (cx, cy) = WebMercator::project(self.center, self.zoom);
            self.center = WebMercator::unproject(cx - f64::from(delta.x), cy - f64::from(delta.y), self.zoom);
            self.ease = None;
        }

        if !response.hovered() {
            return;
        }

        let (scroll, pinch) = ui.input(|i| (i.smooth_scroll_delta.y, i.zoom_delta()));
        let mut zoom_change = 0.0;
        if scroll.abs() > f32::EPSILON {
            zoom_change += f64::from(scroll) / 200.0;
        }
        if (pinch - 1.0).abs() > 0.001 {
            zoom_change += f64::from(pinch.log2());
        }

        if zoom_change != 0.0 {
            let anchor = response.hover_pos().unwrap_or(rect.center());
            self.zoom_around(anchor, (self.zoom + zoom_change).clamp(MIN_ZOOM, MAX_ZOOM), rect);
            self.ease = None;
        }
    }

    /// Change zoom keeping the coordinate under `anchor` fixed on screen.
    fn zoom_around(&mut self, anchor: Pos2, zoom: f64, rect: Rect) {
        let fixed = self.from_screen(anchor, rect);
        let offset = anchor - rect.center();
        let (fx, fy) = WebMercator::project(fixed, zoom);
        self.zoom = zoom;
        self.center = WebMercator::unproject(fx - f64::from(offset.x), fy - f64::from(offset.y), zoom);
    }

    fn step_ease(&mut self) {
        let Some(ease) = &self.ease else {
            return;
        };

        let now = self.ctx.input(|i| i.time);
        let t = ((now - ease.start) / EASE_SECONDS).clamp(0.0, 1.0);
        let eased = 1.0 - (1.0 - t).powi(3);

        self.zoom = ease.from_zoom + (ease.to_zoom - ease.from_zoom) * eased;
        self.center = LngLat::new(
            ease.from_center.lng + (ease.to_center.lng - ease.from_center.lng) * eased,
            ease.from_center.lat + (ease.to_center.lat - ease.from_center.lat) * eased,
        );

        if t >= 1.0 {
            self.ease = None;
        } else {
            self.ctx.request_repaint();
        }
    }

    fn apply_bounds(&mut self) {
        let Some(bounds) = self.max_bounds else {
            return;
        };
        if self.viewport.x <= 0.0 || self.viewport.y <= 0.0 {
            return;
        }

        let (center, zoom) = constrain_camera(
            self.center,
            self.zoom,
            f64::from(self.viewport.x),
            f64::from(self.viewport.y),
            &bounds,
        );
        self.center = center;
        self.zoom = zoom.min(MAX_ZOOM);
    }

    fn draw_tiles(&mut self, painter: &egui::Painter, rect: Rect) {
        let center = rect.center();
        let visible = TileManager::get_visible_tiles(self.center, self.zoom, rect.width(), rect.height());

        let coords: Vec<_> = visible.iter().map(|placed| placed.coord).collect();

        let mut tiles_rendered = 0;
        for placed in visible {
            if let Some(texture) = self.tiles.get_tile(placed.coord, &self.ctx) {
                let tile_rect = Rect::from_min_size(
                    center + Vec2::new(placed.offset_x, placed.offset_y),
                    Vec2::splat(placed.size),
                );
                painter.image(
                    texture.id(),
                    tile_rect,
                    Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                    Color32::WHITE,
                );
                tiles_rendered += 1;
            }
        }

        let failed = self.tiles.get_error_count(&coords);
        if failed > 0 {
            self.tile_error = Some(format!("Failed to load {failed} tiles"));
        } else if self.tiles.has_loading_tiles(&coords) {
            self.tile_error = Some("Loading map tiles...".to_string());
        } else if tiles_rendered > 0 {
            self.tile_error = None;
        }
    }

    fn draw_layers(&mut self, painter: &egui::Painter, rect: Rect) {
        let bounds = visible_bounds(
            self.center,
            self.zoom,
            f64::from(rect.width()) + CULL_MARGIN_PX * 2.0,
            f64::from(rect.height()) + CULL_MARGIN_PX * 2.0,
        );

        let mut placed_labels: Vec<Rect> = Vec::new();
        let mut hits = Vec::new();

        for layer in &self.layers {
            let Some(source) = self.sources.get(&layer.source) else {
                continue;
            };

            for entry in source.index.entries(&bounds, self.zoom) {
                let wanted = match (layer.filter, &entry) {
                    (LayerFilter::All, _)
                    | (LayerFilter::Clustered, IndexEntry::Cluster { .. })
                    | (LayerFilter::Unclustered, IndexEntry::Point { .. }) => true,
                    _ => false,
                };
                if !wanted {
                    continue;
                }

                let pos = self.to_screen(entry.coordinates(), rect);
                let feature = rendered_feature(layer, source, &entry);

                match &layer.kind {
                    LayerKind::Circle { radius, color } => {
                        let r = match entry {
                            IndexEntry::Cluster { point_count, .. } => radius.evaluate(point_count),
                            IndexEntry::Point { .. } => radius.base,
                        };
                        painter.circle_filled(pos, r, Color32::from_rgb(color.0, color.1, color.2));
                        painter.circle_stroke(pos, r, Stroke::new(1.0, Color32::WHITE));
                        hits.push(Hit {
                            feature,
                            shape: HitShape::Circle { center: pos, radius: r },
                        });
                    }
                    LayerKind::Symbol {
                        icon,
                        icon_size,
                        text,
                        text_size,
                        text_offset,
                        text_anchor,
                        text_color,
                    } => {
                        let mut hit_rect: Option<Rect> = None;

                        if let Some(texture) = icon.as_ref().and_then(|name| self.images.get(name)) {
                            let icon_rect = Rect::from_center_size(pos, Vec2::splat(*icon_size));
                            painter.image(
                                texture.id(),
                                icon_rect,
                                Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                                Color32::WHITE,
                            );
                            hit_rect = Some(icon_rect);
                        }

                        let label = text.as_ref().and_then(|field| label_text(field, source, &entry));
                        if let Some(label) = label {
                            let color = Color32::from_rgb(text_color.0, text_color.1, text_color.2);
                            let galley = painter.layout_no_wrap(label, FontId::proportional(*text_size), color);
                            let anchor_pos = pos + Vec2::new(text_offset[0], text_offset[1]) * *text_size;
                            let align = match text_anchor {
                                TextAnchor::Center => Align2::CENTER_CENTER,
                                TextAnchor::Top => Align2::CENTER_TOP,
                            };
                            let label_rect = align.anchor_size(anchor_pos, galley.size());

                            // Centered labels (cluster counts) always show; others
                            // are dropped when they collide.
                            let collides = *text_anchor != TextAnchor::Center
                                && placed_labels.iter().any(|other| other.intersects(label_rect));
                            if !collides {
                                if *text_anchor != TextAnchor::Center {
                                    painter.rect_filled(
                                        label_rect.expand2(Vec2::new(3.0, 1.0)),
                                        2.0,
                                        Color32::from_rgba_unmultiplied(255, 255, 255, 200),
                                    );
                                }
                                painter.galley(label_rect.min, galley, color);
                                placed_labels.push(label_rect);
                                hit_rect = Some(hit_rect.map_or(label_rect, |r| r.union(label_rect)));
                            }
                        }

                        if let Some(shape) = hit_rect {
                            hits.push(Hit {
                                feature,
                                shape: HitShape::Rect(shape),
                            });
                        }
                    }
                }
            }
        }

        self.hits = hits;
    }

    fn draw_popup(&self, painter: &egui::Painter, rect: Rect) -> Option<PopupFrame> {
        let popup = self.popup.as_ref()?;
        let anchor = self.to_screen(popup.lng_lat, rect);
        if !rect.contains(anchor) {
            return None;
        }

        let heading = painter.layout_no_wrap(
            popup.heading.clone(),
            FontId::proportional(13.0),
            Color32::from_rgb(30, 30, 30),
        );
        let lines: Vec<_> = popup
            .lines
            .iter()
            .filter(|line| !line.is_empty())
            .map(|line| painter.layout_no_wrap(line.clone(), FontId::proportional(11.0), Color32::from_rgb(70, 70, 70)))
            .collect();

        let padding = Vec2::new(10.0, 8.0);
        let close_size = 14.0;
        let width = lines
            .iter()
            .map(|g| g.size().x)
            .fold(heading.size().x + close_size + 6.0, f32::max);
        let height = heading.size().y + lines.iter().map(|g| g.size().y + 2.0).sum::<f32>();

        let tip = 8.0;
        let body = Rect::from_min_size(
            Pos2::new(anchor.x - width / 2.0 - padding.x, anchor.y - tip - height - padding.y * 2.0),
            Vec2::new(width, height) + padding * 2.0,
        );

        painter.rect_filled(body.translate(Vec2::new(1.0, 2.0)), 4.0, Color32::from_black_alpha(60));
        painter.rect_filled(body, 4.0, Color32::WHITE);
        painter.add(egui::Shape::convex_polygon(
            vec![
                Pos2::new(anchor.x - tip, body.bottom()),
                Pos2::new(anchor.x + tip, body.bottom()),
                anchor,
            ],
            Color32::WHITE,
            Stroke::NONE,
        ));

        let mut cursor = body.min + padding;
        let heading_height = heading.size().y;
        painter.galley(cursor, heading, Color32::BLACK);
        cursor.y += heading_height + 2.0;
        for line in lines {
            let line_height = line.size().y;
            painter.galley(cursor, line, Color32::BLACK);
            cursor.y += line_height + 2.0;
        }

        let close = Rect::from_min_size(
            Pos2::new(body.right() - close_size - 4.0, body.top() + 4.0),
            Vec2::splat(close_size),
        );
        painter.text(
            close.center(),
            Align2::CENTER_CENTER,
            "×",
            FontId::proportional(14.0),
            Color32::from_rgb(120, 120, 120),
        );

        Some(PopupFrame { body, close })
    }

    /// Zoom buttons. Returns true if one was clicked this frame.
    fn draw_controls(&mut self, ui: &mut egui::Ui, rect: Rect) -> bool {
        if !self.controls.contains(&Control::Navigation) {
            return false;
        }

        let size = Vec2::splat(28.0);
        let zoom_in = Rect::from_min_size(rect.right_top() + Vec2::new(-38.0, 10.0), size);
        let zoom_out = zoom_in.translate(Vec2::new(0.0, 32.0));

        let mut clicked = false;
        if ui.put(zoom_in, egui::Button::new("+")).on_hover_text("Zoom in").clicked() {
            self.ease_to(CameraOptions {
                center: None,
                zoom: Some(self.zoom + 1.0),
            });
            clicked = true;
        }
        if ui.put(zoom_out, egui::Button::new("−")).on_hover_text("Zoom out").clicked() {
            self.ease_to(CameraOptions {
                center: None,
                zoom: Some(self.zoom - 1.0),
            });
            clicked = true;
        }
        clicked
    }

    fn draw_status(&self, painter: &egui::Painter, rect: Rect) {
        painter.text(
            rect.right_bottom() + Vec2::new(-10.0, -10.0),
            Align2::RIGHT_BOTTOM,
            self.tiles.source().attribution(),
            FontId::proportional(10.0),
            Color32::from_black_alpha(180),
        );

        let Some(ref error_msg) = self.tile_error else {
            return;
        };

        let bg_color = if error_msg.contains("Failed") {
            Color32::from_rgb(220, 50, 50)
        } else {
            Color32::from_rgb(255, 200, 100)
        };

        let error_pos = rect.center_top() + Vec2::new(0.0, 20.0);
        let text_galley = painter.layout_no_wrap(error_msg.clone(), FontId::proportional(12.0), Color32::WHITE);
        let padding = Vec2::new(12.0, 6.0);
        let bubble_rect = Rect::from_center_size(error_pos, text_galley.size() + padding * 2.0);

        painter.rect_filled(bubble_rect, 5.0, bg_color);
        painter.text(
            error_pos,
            Align2::CENTER_CENTER,
            error_msg,
            FontId::proportional(12.0),
            Color32::WHITE,
        );
    }

    fn emit_events(&mut self, response: &egui::Response, control_clicked: bool) {
        let rect = response.rect;
        let mut queued = Vec::new();

        if !self.loaded {
            self.loaded = true;
            for sub in self.subscriptions.iter().filter(|s| s.kind == EventKind::Load) {
                queued.push(MapEvent {
                    subscription: sub.id,
                    kind: EventKind::Load,
                    point: None,
                    lng_lat: None,
                    features: Vec::new(),
                });
            }
        }

        // Hover transitions per layer referenced by enter/leave subscriptions
        let pointer = response.hover_pos();
        let mut hover_layers: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|s| matches!(s.kind, EventKind::MouseEnter | EventKind::MouseLeave))
            .filter_map(|s| s.layer.clone())
            .collect();
        hover_layers.sort();
        hover_layers.dedup();

        for layer in hover_layers {
            let features = pointer.map_or_else(Vec::new, |p| self.hits_at(p, &[layer.as_str()]));
            let over = !features.is_empty();
            let was_over = self.hover.insert(layer.clone(), over).unwrap_or(false);

            let kind = match (was_over, over) {
                (false, true) => EventKind::MouseEnter,
                (true, false) => EventKind::MouseLeave,
                _ => continue,
            };

            for sub in self
                .subscriptions
                .iter()
                .filter(|s| s.kind == kind && s.layer.as_deref() == Some(layer.as_str()))
            {
                queued.push(MapEvent {
                    subscription: sub.id,
                    kind,
                    point: pointer.map(|p| self.screen_point(p)),
                    lng_lat: pointer.map(|p| self.from_screen(p, rect)),
                    features: features.clone(),
                });
            }
        }

        if response.clicked() && !control_clicked {
            if let Some(pos) = response.interact_pointer_pos() {
                if self.handle_popup_click(pos) {
                    self.events.extend(queued);
                    return;
                }

                let lng_lat = self.from_screen(pos, rect);
                for sub in self.subscriptions.iter().filter(|s| s.kind == EventKind::Click) {
                    let features = match &sub.layer {
                        Some(layer) => {
                            let found = self.hits_at(pos, &[layer.as_str()]);
                            if found.is_empty() {
                                continue;
                            }
                            found
                        }
                        None => self.hits_at_any(pos),
                    };
                    queued.push(MapEvent {
                        subscription: sub.id,
                        kind: EventKind::Click,
                        point: Some(self.screen_point(pos)),
                        lng_lat: Some(lng_lat),
                        features,
                    });
                }
            }
        }

        self.events.extend(queued);
    }

    /// Close the popup or swallow the click if it landed on the popup.
    /// Returns true if the click was consumed.
    fn handle_popup_click(&mut self, pos: Pos2) -> bool {
        let Some(frame) = &self.popup_frame else {
            return false;
        };

        if frame.close.contains(pos) {
            self.popup = None;
            self.popup_frame = None;
            return true;
        }
        if frame.body.contains(pos) {
            return true;
        }

        // Clicking elsewhere on the map closes the popup
        self.popup = None;
        self.popup_frame = None;
        false
    }

    fn screen_point(&self, pos: Pos2) -> ScreenPoint {
        let local = pos - self.origin;
        ScreenPoint::new(local.x, local.y)
    }

    fn hits_at(&self, pos: Pos2, layers: &[&str]) -> Vec<RenderedFeature> {
        self.hits
            .iter()
            .rev()
            .filter(|hit| layers.contains(&hit.feature.layer.as_str()) && hit.shape.contains(pos))
            .map(|hit| hit.feature.clone())
            .collect()
    }

    fn hits_at_any(&self, pos: Pos2) -> Vec<RenderedFeature> {
        self.hits
            .iter()
            .rev()
            .filter(|hit| hit.shape.contains(pos))
            .map(|hit| hit.feature.clone())
            .collect()
    }
}

fn rendered_feature(layer: &LayerSpec, source: &Source, entry: &IndexEntry) -> RenderedFeature {
    let properties = match *entry {
        IndexEntry::Cluster { id, point_count, .. } => RenderedProperties::Cluster {
            cluster_id: id,
            point_count,
            point_count_abbreviated: abbreviate_count(point_count),
        },
        IndexEntry::Point { feature, .. } => {
            RenderedProperties::Point(source.data.features[feature].properties.clone())
        }
    };

    RenderedFeature {
        layer: layer.id.clone(),
        source: layer.source.clone(),
        coordinates: entry.coordinates(),
        properties,
    }
}

fn label_text(field: &TextField, source: &Source, entry: &IndexEntry) -> Option<String> {
    match (field, entry) {
        (TextField::PointCountAbbreviated, IndexEntry::Cluster { point_count, .. }) => {
            Some(abbreviate_count(*point_count))
        }
        (TextField::Property(name), IndexEntry::Point { feature, .. }) => {
            let properties = &source.data.features[*feature].properties;
            match name.as_str() {
                "title" => Some(properties.title.clone()),
                "description" => Some(properties.description.clone()),
                "rating" => Some(properties.rating.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

impl MapEngine for EguiMap {
    fn add_control(&mut self, control: Control) {
        if !self.controls.contains(&control) {
            self.controls.push(control);
        }
    }

    fn set_max_bounds(&mut self, bounds: LngLatBounds) {
        self.max_bounds = Some(bounds);
        self.apply_bounds();
    }

    fn resize(&mut self) {
        self.resize_pending = true;
        self.ctx.request_repaint();
    }

    fn on(&mut self, kind: EventKind, layer: Option<&str>) -> Subscription {
        let subscription = Subscription {
            id: SubscriptionId(self.next_subscription),
            kind,
            layer: layer.map(str::to_string),
        };
        self.next_subscription += 1;
        self.subscriptions.push(subscription.clone());
        subscription
    }

    fn off(&mut self, subscription: &Subscription) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != subscription.id);
        self.events.retain(|e| e.subscription != subscription.id);
        self.subscriptions.len() != before
    }

    fn add_image(&mut self, name: &str, image: IconImage) -> Result<(), EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        let expected = image.width as usize * image.height as usize * 4;
        if image.width == 0 || image.rgba.len() != expected {
            return Err(EngineError::InvalidImage(name.to_string()));
        }

        let color_image =
            egui::ColorImage::from_rgba_premultiplied([image.width as usize, image.height as usize], &image.rgba);
        let texture = self
            .ctx
            .load_texture(format!("icon_{name}"), color_image, egui::TextureOptions::LINEAR);
        self.images.insert(name.to_string(), texture);
        Ok(())
    }

    fn add_source(&mut self, id: &str, source: GeoJsonSource) -> Result<(), EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        if self.sources.contains_key(id) {
            return Err(EngineError::DuplicateSource(id.to_string()));
        }

        let index = if source.cluster {
            ClusterIndex::new(&source.data, source.cluster_radius, source.cluster_max_zoom)
        } else {
            ClusterIndex::unclustered(&source.data)
        };
        debug!(
            "Source '{}' indexed {} of {} features",
            id,
            index.point_count(),
            source.data.len()
        );

        self.sources.insert(
            id.to_string(),
            Source {
                data: source.data,
                index,
            },
        );
        self.ctx.request_repaint();
        Ok(())
    }

    fn add_layer(&mut self, layer: LayerSpec) -> Result<(), EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        if self.layers.iter().any(|l| l.id == layer.id) {
            return Err(EngineError::DuplicateLayer(layer.id));
        }
        if !self.sources.contains_key(&layer.source) {
            return Err(EngineError::UnknownSource(layer.source));
        }

        self.layers.push(layer);
        self.ctx.request_repaint();
        Ok(())
    }

    fn cluster_expansion_zoom(&self, source: &str, cluster: ClusterId) -> Result<u8, EngineError> {
        let entry = self
            .sources
            .get(source)
            .ok_or_else(|| EngineError::UnknownSource(source.to_string()))?;
        if !entry.index.is_clustered() {
            return Err(EngineError::NotClustered(source.to_string()));
        }
        entry.index.expansion_zoom(cluster)
    }

    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<RenderedFeature> {
        self.hits_at(self.origin + Vec2::new(point.x, point.y), layers)
    }

    fn ease_to(&mut self, camera: CameraOptions) {
        let to_zoom = camera.zoom.unwrap_or(self.zoom).clamp(MIN_ZOOM, MAX_ZOOM);
        self.ease = Some(Ease {
            from_center: self.center,
            to_center: camera.center.unwrap_or(self.center),
            from_zoom: self.zoom,
            to_zoom,
            start: self.ctx.input(|i| i.time),
        });
        self.ctx.request_repaint();
    }

    fn center(&self) -> LngLat {
        self.center
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    fn open_popup(&mut self, popup: Popup) {
        self.popup = Some(popup);
        self.ctx.request_repaint();
    }

    fn drain_events(&mut self) -> Vec<MapEvent> {
        std::mem::take(&mut self.events)
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        info!("Map engine destroyed");
        self.destroyed = true;
        self.subscriptions.clear();
        self.events.clear();
        self.hover.clear();
        self.layers.clear();
        self.sources.clear();
        self.images.clear();
        self.hits.clear();
        self.popup = None;
        self.popup_frame = None;
        self.ease = None;
        self.tiles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StepExpression;
    use ratings_client::{Feature, FeatureProperties, Geometry};

    fn options() -> MapOptions {
        MapOptions {
            style: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            access_token: String::new(),
            center: LngLat::new(-0.1276, 51.5072),
            zoom: 12.0,
        }
    }

    fn source() -> GeoJsonSource {
        let features: FeatureCollection = (0..3)
            .map(|i| Feature {
                geometry: Geometry::point(-0.1276 + f64::from(i) * 0.0001, 51.5072),
                properties: FeatureProperties {
                    title: format!("Place {i}"),
                    description: String::new(),
                    rating: "5".to_string(),
                },
            })
            .collect();
        GeoJsonSource {
            data: features,
            cluster: true,
            cluster_radius: 80.0,
            cluster_max_zoom: 15,
        }
    }

    fn circle_layer(id: &str, source: &str) -> LayerSpec {
        LayerSpec {
            id: id.to_string(),
            source: source.to_string(),
            filter: LayerFilter::Clustered,
            kind: LayerKind::Circle {
                radius: StepExpression {
                    base: 20.0,
                    stops: vec![],
                },
                color: (0, 0, 0),
            },
        }
    }

    #[test]
    fn test_missing_token_for_mapbox_style() {
        let mut opts = options();
        opts.style = "mapbox://styles/mapbox/streets-v12".to_string();
        let err = EguiMap::new(egui::Context::default(), opts).unwrap_err();
        assert_eq!(err, EngineError::MissingAccessToken);
    }

    #[test]
    fn test_source_and_layer_registration() {
        let mut map = EguiMap::new(egui::Context::default(), options()).unwrap();

        assert_eq!(
            map.add_layer(circle_layer("clusters", "establishments")),
            Err(EngineError::UnknownSource("establishments".to_string()))
        );

        map.add_source("establishments", source()).unwrap();
        assert_eq!(
            map.add_source("establishments", source()),
            Err(EngineError::DuplicateSource("establishments".to_string()))
        );

        map.add_layer(circle_layer("clusters", "establishments")).unwrap();
        assert_eq!(
            map.add_layer(circle_layer("clusters", "establishments")),
            Err(EngineError::DuplicateLayer("clusters".to_string()))
        );
    }

    #[test]
    fn test_expansion_zoom_errors() {
        let mut map = EguiMap::new(egui::Context::default(), options()).unwrap();
        assert!(matches!(
            map.cluster_expansion_zoom("nope", ClusterId(1)),
            Err(EngineError::UnknownSource(_))
        ));

        let mut plain = source();
        plain.cluster = false;
        map.add_source("plain", plain).unwrap();
        assert!(matches!(
            map.cluster_expansion_zoom("plain", ClusterId(1)),
            Err(EngineError::NotClustered(_))
        ));
    }

    #[test]
    fn test_subscriptions_are_individually_removable() {
        let mut map = EguiMap::new(egui::Context::default(), options()).unwrap();
        let load = map.on(EventKind::Load, None);
        let click = map.on(EventKind::Click, Some("clusters"));
        assert_ne!(load.id, click.id);

        assert!(map.off(&click));
        assert!(!map.off(&click));
        assert!(map.off(&load));
    }

    #[test]
    fn test_destroy_rejects_further_setup() {
        let mut map = EguiMap::new(egui::Context::default(), options()).unwrap();
        map.destroy();
        assert_eq!(map.add_source("establishments", source()), Err(EngineError::Destroyed));
        assert!(map.drain_events().is_empty());
    }

    #[test]
    fn test_invalid_image_rejected() {
        let mut map = EguiMap::new(egui::Context::default(), options()).unwrap();
        let bad = IconImage {
            width: 4,
            height: 4,
            rgba: vec![0; 3],
        };
        assert_eq!(
            map.add_image("takeaway", bad),
            Err(EngineError::InvalidImage("takeaway".to_string()))
        );
    }

    const SCREEN: Vec2 = Vec2::new(800.0, 600.0);

    /// Paints the map full-screen for one frame with the given input.
    struct Frames {
        time: f64,
    }

    impl Frames {
        fn new() -> Self {
            Self { time: 0.0 }
        }

        fn run(&mut self, map: &mut EguiMap, events: Vec<egui::Event>) {
            self.time += 0.05;
            let input = egui::RawInput {
                screen_rect: Some(Rect::from_min_size(Pos2::ZERO, SCREEN)),
                time: Some(self.time),
                events,
                ..Default::default()
            };
            let ctx = map.ctx.clone();
            let _output = ctx.run(input, |ctx| {
                egui::CentralPanel::default()
                    .frame(egui::Frame::NONE)
                    .show(ctx, |ui| {
                        map.show(ui);
                    });
            });
        }
    }

    fn button(pos: Pos2, pressed: bool) -> egui::Event {
        egui::Event::PointerButton {
            pos,
            button: egui::PointerButton::Primary,
            pressed,
            modifiers: egui::Modifiers::NONE,
        }
    }

    /// A template no tile request can reach, so frames never wait on the network.
    fn offline_options(center: LngLat) -> MapOptions {
        MapOptions {
            style: "http://127.0.0.1:9/{z}/{x}/{y}.png".to_string(),
            access_token: String::new(),
            center,
            zoom: 12.0,
        }
    }

    fn dense_source(center: LngLat, count: u32) -> GeoJsonSource {
        let features: FeatureCollection = (0..count)
            .map(|i| Feature {
                geometry: Geometry::point(
                    center.lng + f64::from(i % 20) * 0.00005,
                    center.lat + f64::from(i / 20) * 0.00005,
                ),
                properties: FeatureProperties {
                    title: format!("Place {i}"),
                    description: String::new(),
                    rating: "4".to_string(),
                },
            })
            .collect();
        GeoJsonSource {
            data: features,
            cluster: true,
            cluster_radius: 80.0,
            cluster_max_zoom: 15,
        }
    }

    #[test]
    fn test_load_fires_once() {
        let ctx = egui::Context::default();
        let mut map = EguiMap::new(ctx, offline_options(LngLat::new(-0.1276, 51.5072))).unwrap();
        let load = map.on(EventKind::Load, None);
        let mut frames = Frames::new();

        frames.run(&mut map, Vec::new());
        let events = map.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subscription, load.id);
        assert_eq!(events[0].kind, EventKind::Load);

        frames.run(&mut map, Vec::new());
        assert!(map.drain_events().is_empty());
    }

    #[test]
    fn test_click_on_painted_cluster() {
        let center = LngLat::new(-0.1276, 51.5072);
        let ctx = egui::Context::default();
        let mut map = EguiMap::new(ctx, offline_options(center)).unwrap();
        let click = map.on(EventKind::Click, Some("clusters"));
        let enter = map.on(EventKind::MouseEnter, Some("clusters"));
        let marker_click = map.on(EventKind::Click, Some("marker"));
        let mut frames = Frames::new();

        frames.run(&mut map, Vec::new());
        map.add_source("establishments", dense_source(center, 200)).unwrap();
        map.add_layer(circle_layer("clusters", "establishments")).unwrap();
        frames.run(&mut map, Vec::new());
        map.drain_events();

        let hits = map.query_rendered_features(ScreenPoint::new(400.0, 300.0), &["clusters"]);
        assert_eq!(hits.len(), 1);
        let cluster = hits[0].cluster_id().unwrap();
        assert!(matches!(
            hits[0].properties,
            RenderedProperties::Cluster { point_count: 200, .. }
        ));
        assert!(map.query_rendered_features(ScreenPoint::new(20.0, 20.0), &["clusters"]).is_empty());
        assert!(map.query_rendered_features(ScreenPoint::new(400.0, 300.0), &["marker"]).is_empty());

        let middle = Pos2::new(400.0, 300.0);
        frames.run(&mut map, vec![egui::Event::PointerMoved(middle)]);
        let entered = map.drain_events();
        assert_eq!(entered.len(), 1);
        assert_eq!(entered[0].subscription, enter.id);

        frames.run(&mut map, vec![button(middle, true)]);
        frames.run(&mut map, vec![button(middle, false)]);
        let clicks: Vec<_> = map
            .drain_events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Click)
            .collect();
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0].subscription, click.id);
        assert_ne!(clicks[0].subscription, marker_click.id);
        assert_eq!(clicks[0].features[0].cluster_id(), Some(cluster));
        assert_eq!(clicks[0].point, Some(ScreenPoint::new(400.0, 300.0)));

        let expansion = map.cluster_expansion_zoom("establishments", cluster).unwrap();
        assert!(expansion > 12);
    }

    #[test]
    fn test_drag_is_clamped_to_max_bounds() {
        let east = 1.681_530_795_91;
        let bounds = LngLatBounds::from_corners([[-7.572_167_934_59, 49.959_999_905], [east, 58.635_000_108_5]]);
        let ctx = egui::Context::default();
        let mut map = EguiMap::new(ctx, offline_options(LngLat::new(1.5, 52.0))).unwrap();
        map.set_max_bounds(bounds);
        let mut frames = Frames::new();

        frames.run(&mut map, Vec::new());
        assert!((map.center().lng - 1.5).abs() < 1e-9);

        // Drag the map 600px to the left, which would move the view past the east edge
        let start = Pos2::new(700.0, 300.0);
        frames.run(&mut map, vec![egui::Event::PointerMoved(start)]);
        frames.run(&mut map, vec![button(start, true)]);
        for x in [690.0, 500.0, 300.0, 100.0] {
            frames.run(&mut map, vec![egui::Event::PointerMoved(Pos2::new(x, 300.0))]);
        }
        frames.run(&mut map, vec![button(Pos2::new(100.0, 300.0), false)]);

        let center = map.center();
        assert!(center.lng > 1.5);
        let visible = visible_bounds(center, map.zoom(), f64::from(SCREEN.x), f64::from(SCREEN.y));
        assert!(visible.ne.lng <= east + 1e-6);
        assert!((visible.ne.lng - east).abs() < 1e-3);
    }

    #[test]
    fn test_max_bounds_without_viewport_is_deferred() {
        let mut map = EguiMap::new(egui::Context::default(), options()).unwrap();
        let bounds = LngLatBounds::from_corners([[-7.57, 49.96], [1.68, 58.64]]);
        map.set_max_bounds(bounds);
        // No frame painted yet, so the camera is untouched
        assert_eq!(map.center(), LngLat::new(-0.1276, 51.5072));
        assert_eq!(map.zoom(), 12.0);
    }
}
