use std::collections::HashSet;

use ratatui::style::Color;

use super::ThemeName;

#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    names: HashSet<ThemeName>,
}

impl ThemeRegistry {
    pub fn contains(&self, theme: &ThemeName) -> bool {
        self.names.contains(theme)
    }

    pub fn all(&self) -> impl Iterator<Item = &ThemeName> {
        self.names.iter()
    }
}

impl Default for ThemeRegistry {
    fn default() -> Self {
        let names = [
            ThemeName::Dark,
            ThemeName::Light,
            ThemeName::HighContrast,
            ThemeName::Solarized,
        ]
        .into_iter()
        .collect();
        Self { names }
    }
}

/// Accent colors the UI pulls from the active theme. Register rows and
/// state badges derive everything else from these.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub focus_border: Color,
    pub highlight: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    pub muted: Color,
}

impl ThemeName {
    pub fn palette(&self) -> Palette {
        match self {
            ThemeName::Dark => Palette {
                focus_border: Color::Cyan,
                highlight: Color::Yellow,
                selection_bg: Color::Blue,
                selection_fg: Color::Black,
                muted: Color::Gray,
            },
            ThemeName::Light => Palette {
                focus_border: Color::Blue,
                highlight: Color::Magenta,
                selection_bg: Color::LightBlue,
                selection_fg: Color::Black,
                muted: Color::DarkGray,
            },
            ThemeName::HighContrast => Palette {
                focus_border: Color::White,
                highlight: Color::Yellow,
                selection_bg: Color::White,
                selection_fg: Color::Black,
                muted: Color::White,
            },
            ThemeName::Solarized => Palette {
                focus_border: Color::Rgb(38, 139, 210),
                highlight: Color::Rgb(181, 137, 0),
                selection_bg: Color::Rgb(7, 54, 66),
                selection_fg: Color::Rgb(238, 232, 213),
                muted: Color::Rgb(88, 110, 117),
            },
        }
    }
}
