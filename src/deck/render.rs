// src/deck/render.rs
//! Deck artifact rendering behind the `DeckRenderer` boundary.
//!
//! The shipped renderer writes a self-contained themed HTML slide document.
//! A renderer failure is fatal for the job and is not retried; that policy
//! lives in the orchestrator, this module just reports errors.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::deck::{Deck, LayoutKind};
use crate::theme::ThemeConfig;

#[derive(Debug, Clone)]
pub struct RenderedDeck {
    pub filename: String,
    pub path: PathBuf,
}

pub trait DeckRenderer: Send + Sync {
    fn render(&self, topic: &str, deck: &Deck) -> anyhow::Result<RenderedDeck>;
}

/// Lowercase, non-alphanumerics collapsed to single dashes. Empty topics
/// fall back to "report".
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_dash = false;
    for ch in text.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }
    let out = out.trim_end_matches('-').to_string();
    if out.is_empty() {
        "report".to_string()
    } else {
        out
    }
}

pub struct HtmlDeckRenderer {
    out_dir: PathBuf,
}

impl HtmlDeckRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl DeckRenderer for HtmlDeckRenderer {
    fn render(&self, topic: &str, deck: &Deck) -> anyhow::Result<RenderedDeck> {
        fs::create_dir_all(&self.out_dir).context("create outputs dir")?;
        let filename = format!(
            "{}_{}.html",
            slugify(topic),
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.out_dir.join(&filename);
        let html = render_html(topic, deck);
        fs::write(&path, html).with_context(|| format!("write deck {}", path.display()))?;
        Ok(RenderedDeck { filename, path })
    }
}

fn esc(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn stylesheet(theme: &ThemeConfig) -> String {
    // Card color auto-contrasts against the configured background, matching
    // the chart renderer's treatment.
    let (card_bg, card_text) = if theme.has_dark_background() {
        ("rgba(255,255,255,0.08)", "#F0F0F0")
    } else {
        ("rgba(0,0,0,0.06)", "#1E1E1E")
    };
    format!(
        r#"
    body {{
      margin: 0;
      background: {bg};
      color: {text};
      font-family: "{font}", sans-serif;
    }}
    section.slide {{
      box-sizing: border-box;
      width: 100vw;
      min-height: 100vh;
      padding: 6vh 8vw;
      page-break-after: always;
    }}
    h1 {{ color: {accent}; font-size: 3.2em; margin-bottom: 0.2em; }}
    h2 {{ color: {accent}; font-size: 2.2em; }}
    .subtitle {{ color: {secondary}; font-size: 1.4em; }}
    .card {{
      background: {card_bg};
      color: {card_text};
      border-radius: {radius}px;
      padding: 2em 2.5em;
      margin-top: 1.5em;
    }}
    .card li {{ font-size: 1.25em; line-height: 1.6; margin-bottom: 0.5em; }}
    .chart {{ display: block; margin: 2em auto 0; max-width: 85%; }}
    .sources li {{ font-size: 0.95em; color: {secondary}; }}
"#,
        bg = theme.background_color,
        text = theme.text_color,
        font = theme.font_family,
        accent = theme.accent_color,
        secondary = theme.brand_secondary,
        card_bg = card_bg,
        card_text = card_text,
        radius = theme.corner_radius,
    )
}

fn render_html(topic: &str, deck: &Deck) -> String {
    let mut out = String::with_capacity(16 * 1024);
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", esc(topic)));
    out.push_str(&format!("<style>{}</style>\n", stylesheet(&deck.theme)));
    out.push_str("</head>\n<body>\n");

    for slide in &deck.slides {
        out.push_str("<section class=\"slide\">\n");
        match slide.layout {
            LayoutKind::Title => {
                out.push_str(&format!("<h1>{}</h1>\n", esc(&slide.title)));
                for line in &slide.bullets {
                    out.push_str(&format!("<p class=\"subtitle\">{}</p>\n", esc(line)));
                }
            }
            LayoutKind::Chart => {
                out.push_str(&format!("<h2>{}</h2>\n", esc(&slide.title)));
                if let Some(src) = &slide.chart_path {
                    out.push_str(&format!(
                        "<img class=\"chart\" src=\"{}\" alt=\"{}\">\n",
                        esc(src),
                        esc(&slide.title)
                    ));
                }
            }
            LayoutKind::Sources => {
                out.push_str(&format!("<h2>{}</h2>\n", esc(&slide.title)));
                out.push_str("<div class=\"card\"><ul class=\"sources\">\n");
                for url in &slide.bullets {
                    out.push_str(&format!("<li>{}</li>\n", esc(url)));
                }
                out.push_str("</ul></div>\n");
            }
            LayoutKind::Agenda | LayoutKind::InsightGroup | LayoutKind::Closing => {
                out.push_str(&format!("<h2>{}</h2>\n", esc(&slide.title)));
                out.push_str("<div class=\"card\"><ul>\n");
                for bullet in &slide.bullets {
                    out.push_str(&format!("<li>{}</li>\n", esc(bullet)));
                }
                out.push_str("</ul></div>\n");
            }
        }
        out.push_str("</section>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}
