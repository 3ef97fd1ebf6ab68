//! File name and title pattern expansion.
//!
//! | Pattern | Replaced by |
//! |---------|-------------|
//! | `%f` | board file name, without extension |
//! | `%i` | what the output makes (`assembly`, `drc`, ...) |
//! | `%x` | file extension |
//! | `%v` | variant file id (`_<name>` unless configured) |
//! | `%I` | the output's `output_id` |
//! | `%p` | title block title |
//! | `%r` | title block revision |
//! | `%c` | title block company |
//! | `%d` | title block date, else the board file date |
//! | `%D` | current date |
//! | `%T` | current time |
//! | `%C1`..`%C9` | title block comments |
//! | `%%` | a literal `%` |
//!
//! Unknown patterns are left untouched.

use chrono::{DateTime, Local};

use crate::board::Board;
use crate::variant::Variant;

/// Expands patterns for one board and variant.
#[derive(Debug, Clone, Copy)]
pub struct Expander<'a> {
    board: &'a Board,
    variant: Option<&'a Variant>,
    date_format: &'a str,
    time_format: &'a str,
}

/// What the expanded name is for.
#[derive(Debug, Clone, Copy, Default)]
pub struct Target<'a> {
    /// `%i`.
    pub id: &'a str,
    /// `%x`.
    pub ext: &'a str,
    /// `%I`.
    pub output_id: &'a str,
}

impl<'a> Target<'a> {
    /// A target with no output id.
    #[must_use]
    pub const fn new(id: &'a str, ext: &'a str) -> Self {
        Self {
            id,
            ext,
            output_id: "",
        }
    }

    /// Sets `%I`.
    #[must_use]
    pub const fn with_output_id(mut self, output_id: &'a str) -> Self {
        self.output_id = output_id;
        self
    }
}

impl<'a> Expander<'a> {
    /// Creates an expander.
    #[must_use]
    pub const fn new(
        board: &'a Board,
        variant: Option<&'a Variant>,
        date_format: &'a str,
        time_format: &'a str,
    ) -> Self {
        Self {
            board,
            variant,
            date_format,
            time_format,
        }
    }

    /// Expands every pattern in `text`.
    #[must_use]
    pub fn expand(&self, text: &str, target: &Target<'_>) -> String {
        let mut out = String::with_capacity(text.len() + 16);
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let Some(&code) = chars.peek() else {
                out.push('%');
                break;
            };
            if code == 'C' {
                chars.next();
                match chars.peek().and_then(|d| d.to_digit(10)).filter(|d| *d > 0) {
                    Some(n) => {
                        chars.next();
                        out.push_str(self.board.title_block.comment(n as usize));
                    }
                    None => out.push_str("%C"),
                }
                continue;
            }
            match self.value(code, target) {
                Some(value) => {
                    chars.next();
                    out.push_str(&value);
                }
                None => out.push('%'),
            }
        }
        out
    }

    /// Expands a title: same patterns, no target.
    #[must_use]
    pub fn expand_title(&self, text: &str) -> String {
        self.expand(text, &Target::default())
    }

    fn value(&self, code: char, target: &Target<'_>) -> Option<String> {
        let tb = &self.board.title_block;
        Some(match code {
            '%' => "%".to_string(),
            'f' => self.board.file_stem(),
            'i' => target.id.to_string(),
            'x' => target.ext.to_string(),
            'v' => self.variant.map(Variant::file_id).unwrap_or_default().to_string(),
            'I' => target.output_id.to_string(),
            'p' => tb.title.clone(),
            'r' => tb.revision.clone(),
            'c' => tb.company.clone(),
            'd' => self.board_date(),
            'D' => Local::now().format(self.date_format).to_string(),
            'T' => Local::now().format(self.time_format).to_string(),
            _ => return None,
        })
    }

    fn board_date(&self) -> String {
        let date = &self.board.title_block.date;
        if !date.is_empty() {
            return date.clone();
        }
        let file = self.board.pcb_path().unwrap_or_else(|| self.board.path.clone());
        std::fs::metadata(&file)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Local>::from(t).format(self.date_format).to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::variant::VariantRule;

    fn board() -> Board {
        let mut board = Board::default();
        board.path = PathBuf::from("/nonexistent/snap.json");
        board.pcb_file = Some(PathBuf::from("demo.kicad_pcb"));
        board.title_block.title = "Demo".into();
        board.title_block.revision = "B".into();
        board.title_block.company = "ACME".into();
        board.title_block.date = "2024-01-02".into();
        board.title_block.comments = vec!["first".into(), "second".into()];
        board
    }

    #[test]
    fn default_pattern() {
        let board = board();
        let variant = Variant::new(
            "prod",
            VariantRule::IBom {
                variant_field: "Variant".into(),
                blacklist: vec![],
                whitelist: vec![],
            },
        );
        let e = Expander::new(&board, Some(&variant), "%Y-%m-%d", "%H-%M-%S");
        let t = Target::new("assembly", "pdf").with_output_id("_top");
        assert_eq!(e.expand("%f-%i%I%v.%x", &t), "demo-assembly_top_prod.pdf");
        let plain = Expander::new(&board, None, "%Y-%m-%d", "%H-%M-%S");
        assert_eq!(plain.expand("%f-%i%I%v.%x", &Target::new("drc", "txt")), "demo-drc.txt");
    }

    #[test]
    fn title_block_values() {
        let board = board();
        let e = Expander::new(&board, None, "%Y", "%H");
        assert_eq!(e.expand_title("%p rev %r by %c on %d"), "Demo rev B by ACME on 2024-01-02");
        assert_eq!(e.expand_title("%C1/%C2/%C3"), "first/second/");
    }

    #[test]
    fn current_date() {
        let board = board();
        let e = Expander::new(&board, None, "%Y", "%H");
        let year = e.expand_title("%D");
        assert_eq!(year, Local::now().format("%Y").to_string());
    }

    #[test]
    fn unknown_and_escaped() {
        let board = board();
        let e = Expander::new(&board, None, "%Y", "%H");
        assert_eq!(e.expand_title("100%% %q %C %"), "100% %q %C %");
    }

    #[test]
    fn date_falls_back_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut board = Board::default();
        board.path = dir.path().join("snap.json");
        std::fs::write(&board.path, "{}").unwrap();
        let e = Expander::new(&board, None, "%Y", "%H");
        assert_eq!(e.expand_title("%d"), Local::now().format("%Y").to_string());
    }
}
