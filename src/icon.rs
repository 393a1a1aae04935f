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

//! Marker icon rasterisation.

use resvg::tiny_skia;
use thiserror::Error;

use crate::engine::IconImage;

/// Takeaway box icon used for individual establishment markers
pub const TAKEAWAY_SVG: &[u8] = include_bytes!("../assets/takeaway.svg");

#[derive(Debug, Error)]
pub enum IconError {
    #[error("failed to parse SVG: {0}")]
    Parse(#[from] usvg::Error),

    #[error("invalid icon size {0}px")]
    InvalidSize(u32),
}

/// Render an SVG into a square premultiplied RGBA bitmap of `size` pixels.
pub fn rasterize_svg(data: &[u8], size: u32) -> Result<IconImage, IconError> {
    let tree = usvg::Tree::from_data(data, &usvg::Options::default())?;
    let mut pixmap = tiny_skia::Pixmap::new(size, size).ok_or(IconError::InvalidSize(size))?;

    let svg_size = tree.size();
    let scale_x = size as f32 / svg_size.width();
    let scale_y = size as f32 / svg_size.height();
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale_x, scale_y),
        &mut pixmap.as_mut(),
    );

    Ok(IconImage {
        width: size,
        height: size,
        rgba: pixmap.take(),
    })
}

/// The takeaway icon at `size` pixels.
pub fn takeaway_icon(size: u32) -> Result<IconImage, IconError> {
    rasterize_svg(TAKEAWAY_SVG, size)
}
