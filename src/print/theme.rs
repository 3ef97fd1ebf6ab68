//! Color themes: the two built-in KiCad themes and KiCad 6 JSON theme files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::board::Layer;
use crate::error::ConfigError;

/// Name of the classic (KiCad 5 like) built-in theme.
pub const BUILTIN_CLASSIC: &str = "_builtin_classic";
/// Name of the KiCad 6 default built-in theme.
pub const BUILTIN_DEFAULT: &str = "_builtin_default";

static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}([0-9A-Fa-f]{2})?$").expect("valid color pattern"));

static RGB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^rgba?\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*(?:,\s*([\d.]+)\s*)?\)$")
        .expect("valid rgb pattern")
});

/// Returns true for `#RRGGBB` and `#RRGGBBAA`.
#[must_use]
pub fn is_color(value: &str) -> bool {
    COLOR_RE.is_match(value)
}

/// Checks a color option.
///
/// # Errors
///
/// Returns a validation error naming `field`.
pub fn validate_color(field: &str, value: &str) -> Result<(), ConfigError> {
    if is_color(value) {
        Ok(())
    } else {
        Err(ConfigError::validation(format!(
            "invalid color for `{field}`: `{value}` (use #RRGGBB or #RRGGBBAA)"
        )))
    }
}

/// Colors for the layers and the special items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    /// Theme name.
    pub name: String,
    layers: HashMap<Layer, String>,
    /// Frame and title block.
    pub pcb_frame: String,
    /// Through hole pads.
    pub pad_through_hole: String,
    /// Through vias.
    pub via_through: String,
    /// Blind and buried vias.
    pub via_blind_buried: String,
    /// Micro vias.
    pub via_micro: String,
}

const CLASSIC: &[(Layer, &str)] = &[
    (Layer::FCu, "#840000"),
    (Layer::BCu, "#008400"),
    (Layer::In(1), "#C2C200"),
    (Layer::In(2), "#C200C2"),
    (Layer::FAdhes, "#840084"),
    (Layer::BAdhes, "#000084"),
    (Layer::FPaste, "#840000"),
    (Layer::BPaste, "#008484"),
    (Layer::FSilkS, "#008484"),
    (Layer::BSilkS, "#840084"),
    (Layer::FMask, "#840084"),
    (Layer::BMask, "#848400"),
    (Layer::DwgsUser, "#C2C2C2"),
    (Layer::CmtsUser, "#000084"),
    (Layer::Eco1User, "#008400"),
    (Layer::Eco2User, "#C2C200"),
    (Layer::EdgeCuts, "#C2C200"),
    (Layer::Margin, "#C200C2"),
    (Layer::FCrtYd, "#848484"),
    (Layer::BCrtYd, "#000084"),
    (Layer::FFab, "#C2C200"),
    (Layer::BFab, "#840000"),
];

const DEFAULT: &[(Layer, &str)] = &[
    (Layer::FCu, "#C83434"),
    (Layer::BCu, "#4D7FC4"),
    (Layer::In(1), "#7FC87F"),
    (Layer::In(2), "#CE7D2C"),
    (Layer::FAdhes, "#843984"),
    (Layer::BAdhes, "#000084"),
    (Layer::FPaste, "#B4A09AE5"),
    (Layer::BPaste, "#00C2C2E5"),
    (Layer::FSilkS, "#F2EDA1"),
    (Layer::BSilkS, "#E800E8"),
    (Layer::FMask, "#D864FF66"),
    (Layer::BMask, "#02FFEE66"),
    (Layer::DwgsUser, "#C2C2C2"),
    (Layer::CmtsUser, "#5963CC"),
    (Layer::Eco1User, "#B4DBD2"),
    (Layer::Eco2User, "#D8C852"),
    (Layer::EdgeCuts, "#D0D2CD"),
    (Layer::Margin, "#FF26E2"),
    (Layer::FCrtYd, "#FF26E2"),
    (Layer::BCrtYd, "#26E9FF"),
    (Layer::FFab, "#AFAFAF"),
    (Layer::BFab, "#585D84"),
];

impl Theme {
    fn from_table(name: &str, table: &[(Layer, &str)], special: [&str; 5]) -> Self {
        Self {
            name: name.to_string(),
            layers: table.iter().map(|(l, c)| (*l, (*c).to_string())).collect(),
            pcb_frame: special[0].to_string(),
            pad_through_hole: special[1].to_string(),
            via_through: special[2].to_string(),
            via_blind_buried: special[3].to_string(),
            via_micro: special[4].to_string(),
        }
    }

    /// The classic theme.
    #[must_use]
    pub fn classic() -> Self {
        Self::from_table(
            BUILTIN_CLASSIC,
            CLASSIC,
            ["#840000", "#C2C200", "#C2C2C2", "#848400", "#008484"],
        )
    }

    /// The KiCad 6 default theme.
    #[must_use]
    pub fn kicad_default() -> Self {
        Self::from_table(
            BUILTIN_DEFAULT,
            DEFAULT,
            ["#C80000", "#E3B72E", "#ECECEC", "#BB9700", "#008484"],
        )
    }

    /// Color for `layer`, if the theme defines one.
    #[must_use]
    pub fn layer_color(&self, layer: Layer) -> Option<&str> {
        self.layers.get(&layer).map(String::as_str)
    }

    /// Loads a theme by name. Built-in names are served directly, a name
    /// ending in `.json` is a file path, any other name is looked up in the
    /// KiCad `colors` directories.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the theme can't be found or parsed.
    pub fn load(name: &str) -> Result<Self, ConfigError> {
        match name {
            BUILTIN_CLASSIC => return Ok(Self::classic()),
            BUILTIN_DEFAULT => return Ok(Self::kicad_default()),
            _ => {}
        }
        let path = if Path::new(name)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        {
            Some(PathBuf::from(name))
        } else {
            theme_dirs()
                .into_iter()
                .map(|dir| dir.join(format!("{name}.json")))
                .find(|p| p.is_file())
        };
        let path = path
            .filter(|p| p.is_file())
            .ok_or_else(|| ConfigError::validation(format!("unable to load `{name}` color theme")))?;
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        let theme = Self::from_json(name, &content).map_err(|message| {
            ConfigError::validation(format!("bad color theme {}: {message}", path.display()))
        })?;
        tracing::debug!(theme = name, path = %path.display(), "Loaded color theme");
        Ok(theme)
    }

    /// Parses a KiCad 6 theme file. Missing entries keep the default theme
    /// colors.
    ///
    /// # Errors
    ///
    /// Returns a message when the JSON can't be parsed.
    pub fn from_json(name: &str, content: &str) -> Result<Self, String> {
        let json: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
        let board = json
            .get("board")
            .ok_or_else(|| "missing `board` section".to_string())?;
        let mut theme = Self::kicad_default();
        theme.name = name.to_string();
        let color = |key: &str| board.get(key).and_then(|v| v.as_str()).and_then(kicad_color);
        if let Some(copper) = board.get("copper") {
            let cu = |key: &str| copper.get(key).and_then(|v| v.as_str()).and_then(kicad_color);
            for layer in Layer::copper(32) {
                let key = match layer {
                    Layer::FCu => "f".to_string(),
                    Layer::BCu => "b".to_string(),
                    Layer::In(n) => format!("in{n}"),
                    _ => continue,
                };
                if let Some(c) = cu(&key) {
                    theme.layers.insert(layer, c);
                }
            }
        }
        for layer in Layer::technical().chain((1..=9).map(Layer::User)) {
            let key = layer.name().to_lowercase().replace('.', "_");
            if let Some(c) = color(&key) {
                theme.layers.insert(layer, c);
            }
        }
        let specials = [
            ("worksheet", &mut theme.pcb_frame),
            ("pad_through_hole", &mut theme.pad_through_hole),
            ("via_through", &mut theme.via_through),
            ("via_blind_buried", &mut theme.via_blind_buried),
            ("via_micro", &mut theme.via_micro),
        ];
        for (key, slot) in specials {
            if let Some(c) = color(key) {
                *slot = c;
            }
        }
        Ok(theme)
    }
}

/// Converts `rgb(r, g, b)` / `rgba(r, g, b, a)` to `#RRGGBB[AA]`.
#[must_use]
pub fn kicad_color(value: &str) -> Option<String> {
    let caps = RGB_RE.captures(value.trim())?;
    let channel = |i: usize| caps[i].parse::<u8>().ok();
    let mut out = format!("#{:02X}{:02X}{:02X}", channel(1)?, channel(2)?, channel(3)?);
    if let Some(alpha) = caps.get(4) {
        let alpha: f64 = alpha.as_str().parse().ok()?;
        if alpha < 1.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // 0..=255
            let a = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
            out.push_str(&format!("{a:02X}"));
        }
    }
    Some(out)
}

fn theme_dirs() -> Vec<PathBuf> {
    let Some(base) = dirs::config_dir() else {
        return Vec::new();
    };
    let kicad = base.join("kicad");
    let mut versions: Vec<PathBuf> = std::fs::read_dir(&kicad)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path().join("colors"))
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    // newest KiCad first
    versions.sort();
    versions.reverse();
    versions.push(kicad.join("colors"));
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_validate() {
        assert!(is_color("#14332440"));
        assert!(is_color("#abcdef"));
        assert!(!is_color("#abc"));
        assert!(!is_color("red"));
        assert!(validate_color("color", "blue").is_err());
    }

    #[test]
    fn builtins() {
        let classic = Theme::load(BUILTIN_CLASSIC).unwrap();
        assert_eq!(classic.layer_color(Layer::FCu), Some("#840000"));
        let default = Theme::load(BUILTIN_DEFAULT).unwrap();
        assert_eq!(default.layer_color(Layer::BCu), Some("#4D7FC4"));
        assert_eq!(default.layer_color(Layer::User(3)), None);
        assert!(Theme::load("no_such_theme").is_err());
    }

    #[test]
    fn rgb_conversion() {
        assert_eq!(kicad_color("rgb(200, 52, 52)").as_deref(), Some("#C83434"));
        assert_eq!(kicad_color("rgba(216, 100, 255, 0.400)").as_deref(), Some("#D864FF66"));
        assert_eq!(kicad_color("rgba(1, 2, 3, 1.000)").as_deref(), Some("#010203"));
        assert_eq!(kicad_color("blue"), None);
    }

    #[test]
    fn json_theme() {
        let json = r#"{"board": {
            "copper": {"f": "rgb(255, 0, 0)", "in1": "rgb(0, 255, 0)"},
            "f_silks": "rgb(1, 1, 1)",
            "edge_cuts": "rgb(2, 2, 2)",
            "user_1": "rgb(3, 3, 3)",
            "worksheet": "rgb(4, 4, 4)",
            "via_micro": "rgb(5, 5, 5)"
        }}"#;
        let theme = Theme::from_json("mine", json).unwrap();
        assert_eq!(theme.layer_color(Layer::FCu), Some("#FF0000"));
        assert_eq!(theme.layer_color(Layer::In(1)), Some("#00FF00"));
        assert_eq!(theme.layer_color(Layer::FSilkS), Some("#010101"));
        assert_eq!(theme.layer_color(Layer::EdgeCuts), Some("#020202"));
        assert_eq!(theme.layer_color(Layer::User(1)), Some("#030303"));
        assert_eq!(theme.pcb_frame, "#040404");
        assert_eq!(theme.via_micro, "#050505");
        // untouched entries keep the defaults
        assert_eq!(theme.layer_color(Layer::BCu), Some("#4D7FC4"));
        assert!(Theme::from_json("x", "{}").is_err());
    }

    #[test]
    fn theme_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mine.json");
        std::fs::write(&path, r#"{"board": {"b_mask": "rgb(0, 0, 255)"}}"#).unwrap();
        let theme = Theme::load(path.to_str().unwrap()).unwrap();
        assert_eq!(theme.layer_color(Layer::BMask), Some("#0000FF"));
    }
}
