use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    terminal::{Clear, ClearType},
};
use docscope_core::{Command, RenderImage};
use png::{BitDepth, ColorType, Encoder};

const CHUNK_SIZE: usize = 4096;

/// Draws page bitmaps with the kitty graphics protocol.
pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes the page image, e.g. when the last file was removed.
    pub fn delete_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,q=2,i={}\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// What a one-line text prompt is collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    AddTopic,
    RemoveTopic,
    /// Path of a PDF to add to the registry.
    AddFile,
    /// Minimum score of the next analysis request.
    Threshold,
    /// Minimum score of the result list filter.
    MinScore,
}

impl PromptKind {
    pub fn label(self) -> &'static str {
        match self {
            PromptKind::AddTopic => "add topic",
            PromptKind::RemoveTopic => "remove topic",
            PromptKind::AddFile => "add file",
            PromptKind::Threshold => "request min score",
            PromptKind::MinScore => "filter min score",
        }
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    BeginPrompt(PromptKind),
    PromptChanged { text: String },
    PromptSubmit { kind: PromptKind, text: String },
    PromptCancel,
    StartAnalysis,
    ToggleGenerateTopics,
    RemoveCurrentFile,
    OpenResults,
    CloseOverlay,
    ResultsMoveSelection { delta: isize },
    ResultsActivateSelection,
    /// 0-based position in the topic set.
    ToggleTopicFilterAt { index: usize },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Results,
    Prompt(PromptKind),
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    prompt_buffer: String,
}

impl EventMapper {
    pub const ZOOM_IN: f32 = 1.1;
    pub const ZOOM_OUT: f32 = 0.9;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.prompt_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        match self.mode {
            InputMode::Normal => self.map_key_normal(code, modifiers),
            InputMode::Results => self.map_key_results(code, modifiers),
            InputMode::Prompt(kind) => self.map_key_prompt(kind, code, modifiers),
        }
    }

    fn map_key_normal(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Down, KeyModifiers::NONE)
            | (KeyCode::PageDown, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Up, KeyModifiers::NONE)
            | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.take_count();
                UiEvent::Command(Command::GotoPage { page })
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => match self.pending_count.take() {
                Some(page) if page > 0 => {
                    self.reset_count();
                    UiEvent::Command(Command::GotoPage { page })
                }
                _ => {
                    self.reset_count();
                    UiEvent::Command(Command::LastPage)
                }
            },
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ScaleBy {
                    factor: Self::ZOOM_IN,
                })
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ScaleBy {
                    factor: Self::ZOOM_OUT,
                })
            }
            (KeyCode::Char('='), _) => {
                self.reset_count();
                UiEvent::Command(Command::ResetScale)
            }
            (KeyCode::Tab, _) => match self.pending_count.take() {
                Some(n) if n > 0 => {
                    self.reset_count();
                    UiEvent::Command(Command::SelectFile { index: n - 1 })
                }
                _ => {
                    self.reset_count();
                    UiEvent::Command(Command::NextFile)
                }
            },
            (KeyCode::Char('x'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::RemoveCurrentFile
            }
            (KeyCode::Char('u'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::AddFile),
            (KeyCode::Char('X'), _) => {
                self.reset_count();
                UiEvent::Command(Command::RemoveAllFiles)
            }
            (KeyCode::Char('a'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::AddTopic),
            (KeyCode::Char('d'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::RemoveTopic),
            (KeyCode::Char('C'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ClearTopics)
            }
            (KeyCode::Char('A'), _) => {
                self.reset_count();
                UiEvent::ToggleGenerateTopics
            }
            (KeyCode::Char('m'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::Threshold),
            (KeyCode::Char('r'), KeyModifiers::NONE) | (KeyCode::Enter, _) => {
                self.reset_count();
                UiEvent::StartAnalysis
            }
            (KeyCode::Char('o'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Results);
                UiEvent::OpenResults
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_results(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Esc, _) | (KeyCode::Char('o'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Normal);
                UiEvent::CloseOverlay
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, _) => {
                UiEvent::ResultsMoveSelection { delta: 1 }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) => {
                UiEvent::ResultsMoveSelection { delta: -1 }
            }
            (KeyCode::Enter, _) => UiEvent::ResultsActivateSelection,
            (KeyCode::Char('n'), KeyModifiers::NONE) | (KeyCode::Right, _) => {
                UiEvent::Command(Command::NextResultsPage)
            }
            (KeyCode::Char('p'), KeyModifiers::NONE) | (KeyCode::Left, _) => {
                UiEvent::Command(Command::PrevResultsPage)
            }
            (KeyCode::Char('s'), KeyModifiers::NONE) => UiEvent::Command(Command::CycleSortKey),
            (KeyCode::Char('S'), _) => UiEvent::Command(Command::ToggleSortDirection),
            (KeyCode::Char('f'), KeyModifiers::NONE) => self.begin_prompt(PromptKind::MinScore),
            (KeyCode::Char('F'), _) => UiEvent::Command(Command::SetFileFilter {
                filter: docscope_core::FileFilter::All,
            }),
            (KeyCode::Char('0'), KeyModifiers::NONE) => UiEvent::Command(Command::ClearTopicFilter),
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                match c.to_digit(10) {
                    Some(digit) => UiEvent::ToggleTopicFilterAt {
                        index: digit as usize - 1,
                    },
                    None => UiEvent::None,
                }
            }
            (KeyCode::Char('q'), _) => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn map_key_prompt(&mut self, kind: PromptKind, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.leave_prompt(kind);
                UiEvent::PromptCancel
            }
            (KeyCode::Enter, _) => {
                let text = std::mem::take(&mut self.prompt_buffer);
                self.leave_prompt(kind);
                UiEvent::PromptSubmit { kind, text }
            }
            (KeyCode::Backspace, _) => {
                self.prompt_buffer.pop();
                UiEvent::PromptChanged {
                    text: self.prompt_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.prompt_buffer.push(c);
                UiEvent::PromptChanged {
                    text: self.prompt_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn begin_prompt(&mut self, kind: PromptKind) -> UiEvent {
        self.set_mode(InputMode::Prompt(kind));
        UiEvent::BeginPrompt(kind)
    }

    /// The filter prompt is opened from the result list and returns there.
    fn leave_prompt(&mut self, kind: PromptKind) {
        let next = match kind {
            PromptKind::MinScore => InputMode::Results,
            _ => InputMode::Normal,
        };
        self.set_mode(next);
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if let InputMode::Prompt(kind) = self.mode {
            return Some(format!("{}: {}", kind.label(), self.prompt_buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}
