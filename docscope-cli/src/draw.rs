use std::io::{self, Write};

use anyhow::Result;
use crossterm::cursor;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use docscope_core::{
    Highlight, NormalizedRect, RenderError, RenderImage, ResultPage, TextRun, Workspace,
};
use docscope_tty::{write_status_line, DrawParams, KittyRenderer};
use tracing::warn;

const HIGHLIGHT_ALPHA: f32 = 0.35;
const MAX_RENDER_SCALE: f32 = 8.0;

/// Selection inside the result list overlay.
#[derive(Debug, Default)]
pub struct ResultsWindow {
    pub selected: usize,
}

impl ResultsWindow {
    pub fn move_selection(&mut self, delta: isize, len: usize) -> bool {
        if len == 0 {
            self.selected = 0;
            return false;
        }
        let next = (self.selected as isize + delta).clamp(0, len as isize - 1) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    pub fn clamp_to(&mut self, len: usize) {
        self.selected = self.selected.min(len.saturating_sub(1));
    }
}

pub fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    workspace: &Workspace,
    pending_input: Option<&str>,
    results: Option<&mut ResultsWindow>,
) -> Result<()> {
    let window = terminal::window_size()?;
    let total_cols = u32::from(window.columns).max(1);
    let total_rows = u32::from(window.rows).max(1);
    let pixel_width = u32::from(window.width);
    let pixel_height = u32::from(window.height);
    let image_rows_available = total_rows.saturating_sub(1).max(1);

    renderer.begin_sync_update()?;
    let frame = draw_frame(
        renderer,
        workspace,
        pending_input,
        results,
        (total_cols, total_rows),
        (pixel_width, pixel_height),
        image_rows_available,
    );
    renderer.end_sync_update()?;
    frame
}

fn draw_frame(
    renderer: &mut KittyRenderer<io::Stdout>,
    workspace: &Workspace,
    pending_input: Option<&str>,
    results: Option<&mut ResultsWindow>,
    (total_cols, total_rows): (u32, u32),
    (pixel_width, pixel_height): (u32, u32),
    image_rows_available: u32,
) -> Result<()> {
    renderer.clear_all()?;

    if let Some(results) = results {
        renderer.delete_image()?;
        draw_results_overlay(renderer, workspace, results, total_cols, image_rows_available)?;
    } else {
        match draw_page(
            renderer,
            workspace,
            total_cols,
            total_rows,
            pixel_width,
            pixel_height,
        ) {
            Ok(()) => {}
            Err(DrawFailure::Render(err)) => {
                renderer.delete_image()?;
                let writer = renderer.writer();
                let message = match err {
                    RenderError::NoDocument => {
                        "No files loaded. Press u to add a PDF.".to_string()
                    }
                    other => other.to_string(),
                };
                crossterm::execute!(
                    writer,
                    cursor::MoveTo(2, (image_rows_available / 2) as u16),
                    Print(message)
                )?;
            }
            Err(DrawFailure::Io(err)) => return Err(err),
        }
    }

    let status = combine_status(workspace.status_line(), pending_input);
    draw_status_line(renderer, &status)?;
    Ok(())
}

enum DrawFailure {
    Render(RenderError),
    Io(anyhow::Error),
}

impl From<anyhow::Error> for DrawFailure {
    fn from(err: anyhow::Error) -> Self {
        DrawFailure::Io(err)
    }
}

impl From<RenderError> for DrawFailure {
    fn from(err: RenderError) -> Self {
        DrawFailure::Render(err)
    }
}

fn draw_page(
    renderer: &mut KittyRenderer<io::Stdout>,
    workspace: &Workspace,
    total_cols: u32,
    total_rows: u32,
    pixel_width: u32,
    pixel_height: u32,
) -> Result<(), DrawFailure> {
    let image_rows_available = total_rows.saturating_sub(1).max(1);
    let margin_cols = total_cols.min(2);
    let margin_rows = image_rows_available.min(2);
    let available_cols = total_cols.saturating_sub(margin_cols).max(1);
    let available_rows = image_rows_available.saturating_sub(margin_rows).max(1);

    let zoom = workspace.view().scale;
    let mut page = workspace.render_current_with_scale(zoom)?;
    let mut render_scale = zoom;

    let cell_width = pixel_width as f32 / total_cols as f32;
    let cell_height = pixel_height as f32 / total_rows as f32;
    if cell_width > 0.0 && cell_height > 0.0 && page.image.width > 0 && page.image.height > 0 {
        let width_ratio = cell_width * available_cols as f32 / page.image.width as f32;
        let height_ratio = cell_height * available_rows as f32 / page.image.height as f32;
        let scale_ratio = width_ratio.min(height_ratio);
        if scale_ratio > 1.05 {
            render_scale = (zoom * scale_ratio).min(MAX_RENDER_SCALE);
            page = workspace.render_current_with_scale(render_scale)?;
        }
    }

    let mut geometry = HighlightGeometry::new(page.image.width, page.image.height);
    let mut display_image = page.image;
    if zoom > 1.0 {
        let crop_ratio = 1.0 / zoom;
        let crop_width = (display_image.width as f32 * crop_ratio)
            .round()
            .clamp(1.0, display_image.width.max(1) as f32) as u32;
        let crop_height = (display_image.height as f32 * crop_ratio)
            .round()
            .clamp(1.0, display_image.height.max(1) as f32) as u32;
        let offset_x = display_image.width.saturating_sub(crop_width) / 2;
        geometry.set_crop(offset_x, 0, crop_width, crop_height);
        display_image = crop_render_image(&display_image, offset_x, 0, crop_width, crop_height);
    }

    paint_highlights(&mut display_image, &page.runs, &page.highlights, &geometry);

    let (draw_cols, draw_rows) = compute_scaled_dimensions(
        &display_image,
        available_cols,
        available_rows,
        cell_width,
        cell_height,
    );
    let start_col = total_cols.saturating_sub(draw_cols) / 2;
    let start_row = image_rows_available.saturating_sub(draw_rows) / 2;
    {
        let writer = renderer.writer();
        crossterm::execute!(writer, cursor::MoveTo(start_col as u16, start_row as u16))
            .map_err(anyhow::Error::from)?;
    }
    renderer.draw(&display_image, DrawParams::clamped(draw_cols, draw_rows))?;

    if let Err(err) = workspace.prefetch_neighbors(1, render_scale) {
        warn!(?err, page = page.page, "failed to prefetch neighboring pages");
    }
    Ok(())
}

fn combine_status(base: String, pending_input: Option<&str>) -> String {
    match pending_input.filter(|s| !s.is_empty()) {
        Some(pending) => format!("{base} | {pending}"),
        None => base,
    }
}

pub fn draw_status_line(renderer: &mut KittyRenderer<io::Stdout>, status: &str) -> Result<()> {
    let window = terminal::window_size()?;
    let total_cols = usize::from(window.columns).max(1);
    let status_row = window.rows.saturating_sub(1);
    let writer = renderer.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    let status: String = status.chars().take(total_cols).collect();
    write_status_line(writer, &status)?;
    Ok(())
}

fn draw_results_overlay(
    renderer: &mut KittyRenderer<io::Stdout>,
    workspace: &Workspace,
    results: &mut ResultsWindow,
    total_cols: u32,
    image_rows_available: u32,
) -> Result<()> {
    if total_cols < 20 || image_rows_available < 6 {
        return Ok(());
    }
    let inner_width = total_cols.saturating_sub(4) as usize;
    let lines = results_lines(workspace, results, inner_width);

    let writer = renderer.writer();
    let border = format!("+{}+", "-".repeat(inner_width));
    let mut row = 1u16;
    print_inverted(writer, 1, row, &border)?;
    for line in lines
        .into_iter()
        .take(image_rows_available.saturating_sub(3) as usize)
    {
        row = row.saturating_add(1);
        print_inverted(writer, 1, row, &format!("|{}|", line))?;
    }
    row = row.saturating_add(1);
    print_inverted(writer, 1, row, &border)?;
    Ok(())
}

/// Text content of the result overlay, each line padded to `width`.
fn results_lines(workspace: &Workspace, results: &mut ResultsWindow, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let view = workspace.view();

    let topics: Vec<String> = workspace
        .topics()
        .labels()
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let marker = if view.filters.topics.contains(label) {
                "*"
            } else {
                ""
            };
            format!("{}:{}{}", i + 1, label, marker)
        })
        .collect();
    lines.push(truncate_with_ellipsis(
        format!(" Topics {}", topics.join("  ")),
        width,
    ));
    lines.push(truncate_with_ellipsis(
        format!(
            " min score {:.2} | file {} | sort {} {:?}",
            view.filters.min_score,
            match &view.filters.file {
                docscope_core::FileFilter::All => "all",
                docscope_core::FileFilter::Named(name) => name.as_str(),
            },
            view.sort.key.label(),
            view.sort.direction,
        ),
        width,
    ));
    lines.push("-".repeat(width));

    match workspace.result_page() {
        None => lines.push(truncate_with_ellipsis(
            " No analysis results yet. Press r to analyze.".to_string(),
            width,
        )),
        Some(page) if page.entries.is_empty() => lines.push(truncate_with_ellipsis(
            " No passages match the current filters.".to_string(),
            width,
        )),
        Some(page) => {
            results.clamp_to(page.entries.len());
            lines.extend(format_result_page(&page, results.selected, width));
        }
    }
    lines
}

pub fn format_result_page(page: &ResultPage, selected: usize, width: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(page.entries.len() + 1);
    for (index, entry) in page.entries.iter().enumerate() {
        let marker = if index == selected { '>' } else { ' ' };
        let text = entry.passage.text.replace(['\n', '\r'], " ");
        lines.push(truncate_with_ellipsis(
            format!(
                "{marker} [{:.2}] {} p{} ({}) {}",
                entry.passage.score, entry.passage.document, entry.passage.page, entry.topic, text
            ),
            width,
        ));
    }
    lines.push(truncate_with_ellipsis(
        format!(
            " page {}/{} of {} passage(s)",
            page.page_number, page.total_pages, page.total_entries
        ),
        width,
    ));
    lines
}

fn print_inverted(writer: &mut impl Write, col: u16, row: u16, content: &str) -> Result<()> {
    crossterm::execute!(
        writer,
        cursor::MoveTo(col, row),
        SetAttribute(Attribute::Reverse),
        Print(content),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn truncate_with_ellipsis(text: String, width: usize) -> String {
    let count = text.chars().count();
    let mut text = if count > width {
        if width <= 3 {
            text.chars().take(width).collect()
        } else {
            let mut truncated: String = text.chars().take(width - 3).collect();
            truncated.push_str("...");
            truncated
        }
    } else {
        text
    };
    let count = text.chars().count();
    if count < width {
        text.push_str(&" ".repeat(width - count));
    }
    text
}

fn compute_scaled_dimensions(
    image: &RenderImage,
    available_cols: u32,
    available_rows: u32,
    cell_width: f32,
    cell_height: f32,
) -> (u32, u32) {
    let mut draw_cols = available_cols.max(1);
    let mut draw_rows = available_rows.max(1);
    if image.width == 0 || image.height == 0 {
        return (draw_cols, draw_rows);
    }

    if cell_width > 0.0 && cell_height > 0.0 {
        let cols = (image.width as f32 / cell_width).round().max(1.0);
        let rows = (image.height as f32 / cell_height).round().max(1.0);
        let shrink = (available_cols as f32 / cols)
            .min(available_rows as f32 / rows)
            .min(1.0);
        draw_cols = (cols * shrink).round().max(1.0) as u32;
        draw_rows = (rows * shrink).round().max(1.0) as u32;
    } else {
        // Without pixel metrics assume cells twice as tall as wide.
        let ratio = image.width as f32 / image.height as f32 * 2.0;
        let mut cols = available_cols as f32;
        let mut rows = (cols / ratio).round().max(1.0);
        if rows > available_rows as f32 {
            rows = available_rows as f32;
            cols = (rows * ratio).round().max(1.0);
        }
        draw_cols = cols as u32;
        draw_rows = rows as u32;
    }

    (
        draw_cols.clamp(1, available_cols.max(1)),
        draw_rows.clamp(1, available_rows.max(1)),
    )
}

fn crop_render_image(
    image: &RenderImage,
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
) -> RenderImage {
    if image.width == 0 || image.height == 0 {
        return RenderImage {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
    }

    let width = width.min(image.width).max(1);
    let height = height.min(image.height).max(1);
    let origin_x = origin_x.min(image.width - width);
    let origin_y = origin_y.min(image.height - height);
    let stride = image.width as usize * 4;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height {
        let start = (origin_y + row) as usize * stride + origin_x as usize * 4;
        let end = start + width as usize * 4;
        pixels.extend_from_slice(&image.pixels[start..end]);
    }

    RenderImage {
        width,
        height,
        pixels,
    }
}

struct HighlightGeometry {
    base_width: u32,
    base_height: u32,
    crop: Option<CropRegion>,
}

impl HighlightGeometry {
    fn new(base_width: u32, base_height: u32) -> Self {
        Self {
            base_width: base_width.max(1),
            base_height: base_height.max(1),
            crop: None,
        }
    }

    fn set_crop(&mut self, offset_x: u32, offset_y: u32, width: u32, height: u32) {
        self.crop = Some(CropRegion {
            offset_x,
            offset_y,
            width,
            height,
        });
    }
}

#[derive(Clone, Copy)]
struct CropRegion {
    offset_x: u32,
    offset_y: u32,
    width: u32,
    height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Tints every highlighted text run with its topic colour.
fn paint_highlights(
    image: &mut RenderImage,
    runs: &[TextRun],
    highlights: &[Highlight],
    geometry: &HighlightGeometry,
) {
    if image.width == 0 || image.height == 0 {
        return;
    }
    for highlight in highlights {
        let Some(run) = runs.get(highlight.run_index) else {
            continue;
        };
        if let Some(rect) = normalized_to_pixel_rect(run.rect, geometry) {
            fill_rect(image, rect, highlight.color.as_array(), HIGHLIGHT_ALPHA);
        }
    }
}

fn normalized_to_pixel_rect(rect: NormalizedRect, geom: &HighlightGeometry) -> Option<PixelRect> {
    let width_f = geom.base_width as f32;
    let height_f = geom.base_height as f32;

    let max_x = geom.base_width as i32;
    let max_y = geom.base_height as i32;
    let mut x0 = ((rect.left * width_f).floor() as i32).clamp(0, max_x);
    let mut x1 = ((rect.right * width_f).ceil() as i32).clamp(0, max_x);
    let mut y0 = ((rect.top * height_f).floor() as i32).clamp(0, max_y);
    let mut y1 = ((rect.bottom * height_f).ceil() as i32).clamp(0, max_y);

    if let Some(crop) = &geom.crop {
        let crop_max_x = crop.width as i32;
        let crop_max_y = crop.height as i32;
        x0 = (x0 - crop.offset_x as i32).clamp(0, crop_max_x);
        x1 = (x1 - crop.offset_x as i32).clamp(0, crop_max_x);
        y0 = (y0 - crop.offset_y as i32).clamp(0, crop_max_y);
        y1 = (y1 - crop.offset_y as i32).clamp(0, crop_max_y);
    }

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(PixelRect {
        x0: x0 as u32,
        y0: y0 as u32,
        x1: x1 as u32,
        y1: y1 as u32,
    })
}

fn fill_rect(image: &mut RenderImage, rect: PixelRect, color: [u8; 3], alpha: f32) {
    let width = image.width as usize;
    let x1 = rect.x1.min(image.width);
    let y1 = rect.y1.min(image.height);
    let x0 = rect.x0.min(x1);
    let y0 = rect.y0.min(y1);
    for y in y0..y1 {
        let row_start = y as usize * width * 4;
        for x in x0..x1 {
            let idx = row_start + x as usize * 4;
            blend_pixel(&mut image.pixels[idx..idx + 4], color, alpha);
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, target) in pixel.iter_mut().zip(color) {
        *channel = (*channel as f32 * inv + target as f32 * alpha)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docscope_core::{Passage, ResultEntry, Rgb};

    fn white(width: u32, height: u32) -> RenderImage {
        RenderImage {
            width,
            height,
            pixels: vec![255; (width * height * 4) as usize],
        }
    }

    fn pixel(image: &RenderImage, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * image.width + x) * 4) as usize;
        [
            image.pixels[idx],
            image.pixels[idx + 1],
            image.pixels[idx + 2],
            image.pixels[idx + 3],
        ]
    }

    fn run(left: f32, top: f32, right: f32, bottom: f32) -> TextRun {
        TextRun {
            text: "passage".into(),
            rect: NormalizedRect {
                left,
                top,
                right,
                bottom,
            },
        }
    }

    #[test]
    fn highlights_tint_only_their_run() {
        let mut image = white(10, 10);
        let runs = vec![run(0.0, 0.0, 0.5, 0.2), run(0.5, 0.5, 1.0, 1.0)];
        let highlights = vec![Highlight {
            run_index: 0,
            topic: "energy".into(),
            color: Rgb(0, 0, 255),
        }];
        let geometry = HighlightGeometry::new(10, 10);

        paint_highlights(&mut image, &runs, &highlights, &geometry);

        let tinted = pixel(&image, 1, 1);
        assert!(tinted[2] == 255 && tinted[0] < 255);
        assert_eq!(tinted[3], 255);
        assert_eq!(pixel(&image, 8, 8), [255, 255, 255, 255]);
        assert_eq!(pixel(&image, 1, 5), [255, 255, 255, 255]);
    }

    #[test]
    fn highlights_follow_the_crop() {
        let geometry = {
            let mut g = HighlightGeometry::new(100, 100);
            g.set_crop(25, 0, 50, 50);
            g
        };
        let rect = normalized_to_pixel_rect(
            NormalizedRect {
                left: 0.3,
                top: 0.1,
                right: 0.4,
                bottom: 0.2,
            },
            &geometry,
        )
        .unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x0: 5,
                y0: 10,
                x1: 15,
                y1: 20
            }
        );

        let outside = NormalizedRect {
            left: 0.0,
            top: 0.8,
            right: 0.2,
            bottom: 0.9,
        };
        assert!(normalized_to_pixel_rect(outside, &geometry).is_none());
    }

    #[test]
    fn crop_keeps_requested_window() {
        let mut image = white(4, 4);
        image.pixels[24] = 7;
        let cropped = crop_render_image(&image, 2, 1, 2, 2);
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 2);
        assert_eq!(cropped.pixels[0], 7);
    }

    #[test]
    fn truncation_pads_and_shortens() {
        assert_eq!(truncate_with_ellipsis("abc".into(), 5), "abc  ");
        assert_eq!(truncate_with_ellipsis("abcdefgh".into(), 6), "abc...");
        assert_eq!(truncate_with_ellipsis("äöüäöü".into(), 4), "ä...");
    }

    #[test]
    fn result_lines_mark_selection() {
        let page = ResultPage {
            entries: vec![
                ResultEntry {
                    topic: "energy".into(),
                    passage: Passage {
                        document: "a.pdf".into(),
                        page: 3,
                        text: "Solar\noutput".into(),
                        score: 0.91,
                    },
                    ordinal: 0,
                },
                ResultEntry {
                    topic: "policy".into(),
                    passage: Passage {
                        document: "b.pdf".into(),
                        page: 1,
                        text: "Tariffs".into(),
                        score: 0.55,
                    },
                    ordinal: 1,
                },
            ],
            page_number: 1,
            total_pages: 1,
            total_entries: 2,
        };

        let lines = format_result_page(&page, 1, 60);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("  [0.91] a.pdf p3 (energy) Solar output"));
        assert!(lines[1].starts_with("> [0.55] b.pdf p1 (policy) Tariffs"));
        assert!(lines[2].contains("page 1/1 of 2 passage(s)"));
        assert!(lines.iter().all(|l| l.chars().count() == 60));
    }

    #[test]
    fn results_window_selection_is_bounded() {
        let mut window = ResultsWindow::default();
        assert!(!window.move_selection(-1, 3));
        assert!(window.move_selection(5, 3));
        assert_eq!(window.selected, 2);
        window.clamp_to(1);
        assert_eq!(window.selected, 0);
    }

    #[test]
    fn scaled_dimensions_fit_available_cells() {
        let image = white(400, 800);
        let (cols, rows) = compute_scaled_dimensions(&image, 80, 20, 10.0, 20.0);
        assert!(cols <= 80 && rows <= 20);
        assert_eq!(rows, 20);
        assert_eq!(cols, 20);
    }
}
