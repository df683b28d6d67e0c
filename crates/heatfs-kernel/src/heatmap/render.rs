//! Heatmap rasterization.
//!
//! [`PngRenderer`] draws with embedded-graphics onto an in-memory RGB
//! image and encodes it as PNG. Layout, top to bottom: title, row-axis
//! label, the grid with row/column tick labels and a colour bar on the
//! right, the column-axis label, the colour-bar label and the annotation.

use std::convert::Infallible;
use std::io::Cursor;

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_6X10, FONT_7X14},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use image::{ImageFormat, Rgb, RgbImage};

use super::{ContrastNorm, HeatmapError, PixelMatrix};

/// Default edge length of one grid cell in image pixels.
pub const DEFAULT_CELL_PIXELS: u32 = 10;

/// Largest grid edge, in image pixels, the PNG renderer will draw.
pub const MAX_IMAGE_EDGE: u32 = 16_384;

const MARGIN: u32 = 16;
const AXIS_GUTTER: u32 = 40;
const HEADER: u32 = 56;
const COLORBAR_GAP: u32 = 16;
const COLORBAR_WIDTH: u32 = 16;
const TICK_LEN: u32 = 3;
const TICK_GAP: u32 = 4;

const BACKGROUND: Rgb888 = Rgb888::WHITE;
const FOREGROUND: Rgb888 = Rgb888::BLACK;

/// Everything a renderer needs for one image.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub matrix: &'a PixelMatrix,
    pub norm: &'a ContrastNorm,
    pub title: String,
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub colorbar_label: &'a str,
    pub annotation: String,
}

/// Turns a count matrix into encoded image bytes.
pub trait HeatmapRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>, HeatmapError>;
}

/// Greyscale PNG renderer: white for no access, black for the maximum.
#[derive(Debug, Clone, Copy)]
pub struct PngRenderer {
    cell_pixels: u32,
}

impl Default for PngRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_PIXELS)
    }
}

impl PngRenderer {
    pub fn new(cell_pixels: u32) -> Self {
        Self {
            cell_pixels: cell_pixels.max(1),
        }
    }

    fn draw<D>(&self, target: &mut D, layout: &Layout, request: &RenderRequest<'_>) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb888>,
    {
        let title_style = MonoTextStyle::new(&FONT_7X14, FOREGROUND);
        let label_style = MonoTextStyle::new(&FONT_6X10, FOREGROUND);
        let top = TextStyleBuilder::new().baseline(Baseline::Top).build();

        Text::with_text_style(&request.title, point(MARGIN, MARGIN), title_style, top).draw(target)?;
        Text::with_text_style(
            request.y_label,
            point(MARGIN, layout.grid_y - 2 * FONT_6X10.character_size.height),
            label_style,
            top,
        )
        .draw(target)?;

        self.draw_grid(target, layout, request)?;
        self.draw_axis_ticks(target, layout, request.matrix.side())?;
        self.draw_colorbar(target, layout, request)?;

        let center = TextStyleBuilder::new()
            .baseline(Baseline::Top)
            .alignment(Alignment::Center)
            .build();
        Text::with_text_style(
            request.x_label,
            point(layout.grid_x + layout.grid_px / 2, layout.footer_y),
            label_style,
            center,
        )
        .draw(target)?;

        let line = FONT_6X10.character_size.height;
        Text::with_text_style(
            request.colorbar_label,
            point(MARGIN, layout.footer_y + 2 * line),
            label_style,
            top,
        )
        .draw(target)?;
        Text::with_text_style(
            &request.annotation,
            point(MARGIN, layout.footer_y + 4 * line),
            label_style,
            top,
        )
        .draw(target)?;

        Ok(())
    }

    fn draw_grid<D>(&self, target: &mut D, layout: &Layout, request: &RenderRequest<'_>) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb888>,
    {
        let cell = self.cell_pixels;
        for (y, row) in request.matrix.rows().enumerate() {
            for (x, &count) in row.iter().enumerate() {
                let level = request.norm.normalize(count);
                Rectangle::new(
                    point(layout.grid_x + x as u32 * cell, layout.grid_y + y as u32 * cell),
                    Size::new(cell, cell),
                )
                .into_styled(PrimitiveStyle::with_fill(greys(level)))
                .draw(target)?;
            }
        }

        Rectangle::new(
            point(layout.grid_x - 1, layout.grid_y - 1),
            Size::new(layout.grid_px + 2, layout.grid_px + 2),
        )
        .into_styled(PrimitiveStyle::with_stroke(FOREGROUND, 1))
        .draw(target)?;
        Ok(())
    }

    fn draw_axis_ticks<D>(&self, target: &mut D, layout: &Layout, side: u32) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb888>,
    {
        let style = MonoTextStyle::new(&FONT_6X10, FOREGROUND);
        let rows = TextStyleBuilder::new()
            .baseline(Baseline::Middle)
            .alignment(Alignment::Right)
            .build();
        let columns = TextStyleBuilder::new()
            .baseline(Baseline::Top)
            .alignment(Alignment::Center)
            .build();

        let half = self.cell_pixels / 2;
        for index in axis_ticks(side) {
            let offset = index * self.cell_pixels + half;
            let label = index.to_string();
            Text::with_text_style(
                &label,
                point(layout.grid_x - TICK_GAP - 1, layout.grid_y + offset),
                style,
                rows,
            )
            .draw(target)?;
            Text::with_text_style(
                &label,
                point(layout.grid_x + offset, layout.grid_y + layout.grid_px + TICK_GAP),
                style,
                columns,
            )
            .draw(target)?;
        }
        Ok(())
    }

    fn draw_colorbar<D>(&self, target: &mut D, layout: &Layout, request: &RenderRequest<'_>) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb888>,
    {
        let span = layout.grid_px.saturating_sub(1).max(1) as f64;
        for row in 0..layout.grid_px {
            let level = 1.0 - f64::from(row) / span;
            Rectangle::new(
                point(layout.colorbar_x, layout.grid_y + row),
                Size::new(COLORBAR_WIDTH, 1),
            )
            .into_styled(PrimitiveStyle::with_fill(greys(level)))
            .draw(target)?;
        }
        Rectangle::new(
            point(layout.colorbar_x - 1, layout.grid_y - 1),
            Size::new(COLORBAR_WIDTH + 2, layout.grid_px + 2),
        )
        .into_styled(PrimitiveStyle::with_stroke(FOREGROUND, 1))
        .draw(target)?;

        let style = MonoTextStyle::new(&FONT_6X10, FOREGROUND);
        let middle = TextStyleBuilder::new().baseline(Baseline::Middle).build();
        let right = layout.colorbar_x + COLORBAR_WIDTH;
        for value in colorbar_ticks(request.matrix.max()) {
            let level = request.norm.normalize(value).clamp(0.0, 1.0);
            let y = layout.grid_y + ((1.0 - level) * span).round() as u32;
            Line::new(point(right, y), point(right + TICK_LEN, y))
                .into_styled(PrimitiveStyle::with_stroke(FOREGROUND, 1))
                .draw(target)?;
            Text::with_text_style(&value.to_string(), point(layout.tick_label_x, y), style, middle)
                .draw(target)?;
        }
        Ok(())
    }
}

impl HeatmapRenderer for PngRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>, HeatmapError> {
        let layout = Layout::new(self.cell_pixels, request)?;
        let mut canvas = Canvas::new(layout.width, layout.height);
        self.draw(&mut canvas, &layout, request)
            .unwrap_or_else(|never| match never {});

        let mut bytes = Vec::new();
        canvas
            .image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| HeatmapError::Render(e.to_string()))?;
        Ok(bytes)
    }
}

/// Pixel positions of the image regions.
#[derive(Debug, Clone, Copy)]
struct Layout {
    width: u32,
    height: u32,
    grid_x: u32,
    grid_y: u32,
    grid_px: u32,
    colorbar_x: u32,
    tick_label_x: u32,
    footer_y: u32,
}

impl Layout {
    fn new(cell_pixels: u32, request: &RenderRequest<'_>) -> Result<Self, HeatmapError> {
        let side = request.matrix.side();
        let grid_px = side
            .checked_mul(cell_pixels)
            .filter(|&px| px <= MAX_IMAGE_EDGE)
            .ok_or_else(|| {
                HeatmapError::Render(format!(
                    "{side} cells of {cell_pixels} pixels exceed the {MAX_IMAGE_EDGE} pixel limit"
                ))
            })?;
        let grid_x = MARGIN + AXIS_GUTTER;
        let grid_y = HEADER;
        let colorbar_x = grid_x + grid_px + COLORBAR_GAP;
        let tick_label_x = colorbar_x + COLORBAR_WIDTH + TICK_LEN + TICK_GAP;

        let tick_width = text_width(&FONT_6X10, &request.matrix.max().to_string());
        let annotation_lines = request.annotation.lines().count() as u32;
        let annotation_width = request
            .annotation
            .lines()
            .map(|line| text_width(&FONT_6X10, line))
            .max()
            .unwrap_or(0);

        let line = FONT_6X10.character_size.height;
        let footer_y = grid_y + grid_px + TICK_GAP + 2 * line;

        let width = [
            tick_label_x + tick_width,
            text_width(&FONT_7X14, &request.title),
            text_width(&FONT_6X10, request.colorbar_label),
            annotation_width,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + MARGIN;
        let height = footer_y + (4 + annotation_lines) * line + MARGIN;

        Ok(Self {
            width: width.max(grid_x + grid_px + MARGIN),
            height,
            grid_x,
            grid_y,
            grid_px,
            colorbar_x,
            tick_label_x,
            footer_y,
        })
    }
}

/// Draw target backed by an RGB image buffer.
struct Canvas {
    image: RgbImage,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        let [r, g, b] = [BACKGROUND.r(), BACKGROUND.g(), BACKGROUND.b()];
        Self {
            image: RgbImage::from_pixel(width, height, Rgb([r, g, b])),
        }
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels.into_iter() {
            if coord.x >= 0 && coord.y >= 0 {
                let (x, y) = (coord.x as u32, coord.y as u32);
                if x < self.image.width() && y < self.image.height() {
                    self.image.put_pixel(x, y, Rgb([color.r(), color.g(), color.b()]));
                }
            }
        }
        Ok(())
    }
}

/// Matplotlib-style "Greys": 0.0 is white, 1.0 is black.
fn greys(level: f64) -> Rgb888 {
    let v = (255.0 * (1.0 - level.clamp(0.0, 1.0))).round() as u8;
    Rgb888::new(v, v, v)
}

/// Row/column indices that get a tick label.
fn axis_ticks(side: u32) -> impl Iterator<Item = u32> {
    let step = (side / 4).max(1);
    (0..side).step_by(step as usize)
}

/// Colour-bar tick values: none, a single byte, and the maximum.
fn colorbar_ticks(max: u64) -> Vec<u64> {
    let mut ticks = vec![0, 1, max];
    ticks.retain(|&v| v <= max);
    ticks.dedup();
    ticks
}

fn text_width(font: &MonoFont<'_>, text: &str) -> u32 {
    text.chars().count() as u32 * (font.character_size.width + font.character_spacing)
}

fn point(x: u32, y: u32) -> Point {
    Point::new(x as i32, y as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heatmap::PixelContribution;

    fn request<'a>(matrix: &'a PixelMatrix, norm: &'a ContrastNorm) -> RenderRequest<'a> {
        RenderRequest {
            matrix,
            norm,
            title: "Number of reads of / writes to file 'data.bin'".into(),
            x_label: "column (j)",
            y_label: "row (i)",
            colorbar_label: "Number of affected bytes in each pixel",
            annotation: "Processes:\n  - cat (pid 1)".into(),
        }
    }

    fn sample_matrix() -> PixelMatrix {
        let mut matrix = PixelMatrix::new(2);
        matrix.add(PixelContribution { x: 0, y: 0, count: 312 });
        matrix.add(PixelContribution { x: 1, y: 0, count: 288 });
        matrix
    }

    #[test]
    fn test_png_output_decodes() {
        let matrix = sample_matrix();
        let norm = ContrastNorm::for_matrix(&matrix);
        let renderer = PngRenderer::new(8);
        let req = request(&matrix, &norm);
        let bytes = renderer.render(&req).unwrap();

        assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        let layout = Layout::new(8, &req).unwrap();
        assert_eq!(decoded.dimensions(), (layout.width, layout.height));
    }

    #[test]
    fn test_cells_shaded_by_count() {
        let matrix = sample_matrix();
        let norm = ContrastNorm::for_matrix(&matrix);
        let req = request(&matrix, &norm);
        let bytes = PngRenderer::new(8).render(&req).unwrap();
        let image = image::load_from_memory(&bytes).unwrap().to_rgb8();
        let layout = Layout::new(8, &req).unwrap();

        let cell = |x: u32, y: u32| {
            image.get_pixel(layout.grid_x + x * 8 + 4, layout.grid_y + y * 8 + 4).0
        };
        // Maximum is black, zero stays white, the rest is in between.
        assert_eq!(cell(0, 0), [0, 0, 0]);
        assert_eq!(cell(0, 1), [255, 255, 255]);
        let mid = cell(1, 0)[0];
        assert!(mid > 0 && mid < 255);
    }

    #[test]
    fn test_render_is_deterministic() {
        let matrix = sample_matrix();
        let norm = ContrastNorm::for_matrix(&matrix);
        let renderer = PngRenderer::default();
        let first = renderer.render(&request(&matrix, &norm)).unwrap();
        let second = renderer.render(&request(&matrix, &norm)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_grid_wider_than_limit_is_an_error() {
        let matrix = sample_matrix();
        let norm = ContrastNorm::for_matrix(&matrix);
        let req = request(&matrix, &norm);

        let err = PngRenderer::new(3_000_000_000).render(&req).unwrap_err();
        assert!(matches!(err, HeatmapError::Render(_)));
        assert!(PngRenderer::new(MAX_IMAGE_EDGE / 2 + 1).render(&req).is_err());
        assert!(Layout::new(MAX_IMAGE_EDGE / 2, &req).is_ok());
    }

    #[test]
    fn test_colorbar_ticks() {
        assert_eq!(colorbar_ticks(0), vec![0]);
        assert_eq!(colorbar_ticks(1), vec![0, 1]);
        assert_eq!(colorbar_ticks(312), vec![0, 1, 312]);
    }

    #[test]
    fn test_axis_ticks() {
        assert_eq!(axis_ticks(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(axis_ticks(64).collect::<Vec<_>>(), vec![0, 16, 32, 48]);
    }
}
