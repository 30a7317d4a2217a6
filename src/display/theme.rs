//! Styles for council output.
//!
//! Named ANSI colors only, so the user's palette decides the actual shades.
//! Pending stages and metadata are dim; model names are yellow.

use crossterm::style::{Attribute, Color, ContentStyle};

pub fn dim() -> ContentStyle {
    ContentStyle {
        attributes: Attribute::Dim.into(),
        ..Default::default()
    }
}

pub fn stage_header() -> ContentStyle {
    ContentStyle {
        foreground_color: Some(Color::Cyan),
        attributes: Attribute::Bold.into(),
        ..Default::default()
    }
}

pub fn model_name() -> ContentStyle {
    ContentStyle {
        foreground_color: Some(Color::Yellow),
        ..Default::default()
    }
}

pub fn error() -> ContentStyle {
    ContentStyle {
        foreground_color: Some(Color::Red),
        ..Default::default()
    }
}

pub fn result_line() -> ContentStyle {
    ContentStyle {
        foreground_color: Some(Color::Green),
        attributes: Attribute::Bold.into(),
        ..Default::default()
    }
}

pub fn prompt_style() -> ContentStyle {
    ContentStyle {
        foreground_color: Some(Color::Cyan),
        attributes: Attribute::Bold.into(),
        ..Default::default()
    }
}
