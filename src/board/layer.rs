//! KiCad board layers and layer sets.
//!
//! Layer ids follow the KiCad 6 numbering so that a [`LayerSet`] can be
//! stored in a single `u64`:
//!
//! ```text
//! 0        F.Cu
//! 1..=30   In1.Cu .. In30.Cu
//! 31       B.Cu
//! 32..=49  technical and user layers (B.Adhes .. F.Fab)
//! 50..=58  User.1 .. User.9
//! 59       Rescue
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of inner copper layers KiCad supports.
pub const MAX_INNER_LAYERS: u8 = 30;

/// Number of numbered user layers (`User.1` .. `User.9`).
pub const MAX_USER_LAYERS: u8 = 9;

/// A KiCad board layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    /// Front copper.
    FCu,
    /// Inner copper layer `In<n>.Cu` (1-based).
    In(u8),
    /// Back copper.
    BCu,
    /// Back adhesive.
    BAdhes,
    /// Front adhesive.
    FAdhes,
    /// Back solder paste.
    BPaste,
    /// Front solder paste.
    FPaste,
    /// Back silkscreen.
    BSilkS,
    /// Front silkscreen.
    FSilkS,
    /// Back solder mask.
    BMask,
    /// Front solder mask.
    FMask,
    /// User drawings.
    DwgsUser,
    /// User comments.
    CmtsUser,
    /// ECO 1.
    Eco1User,
    /// ECO 2.
    Eco2User,
    /// Board outline.
    EdgeCuts,
    /// Board margin.
    Margin,
    /// Back courtyard.
    BCrtYd,
    /// Front courtyard.
    FCrtYd,
    /// Back fabrication.
    BFab,
    /// Front fabrication.
    FFab,
    /// Numbered user layer `User.<n>` (1-based).
    User(u8),
    /// Scratch layer used to park items while plotting. Never plotted.
    Rescue,
}

/// Fixed layers in id order, from `B.Adhes` (32) to `F.Fab` (49).
const TECHNICAL: [Layer; 18] = [
    Layer::BAdhes,
    Layer::FAdhes,
    Layer::BPaste,
    Layer::FPaste,
    Layer::BSilkS,
    Layer::FSilkS,
    Layer::BMask,
    Layer::FMask,
    Layer::DwgsUser,
    Layer::CmtsUser,
    Layer::Eco1User,
    Layer::Eco2User,
    Layer::EdgeCuts,
    Layer::Margin,
    Layer::BCrtYd,
    Layer::FCrtYd,
    Layer::BFab,
    Layer::FFab,
];

impl Layer {
    /// Returns the numeric KiCad layer id.
    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::FCu => 0,
            Self::In(n) => n,
            Self::BCu => 31,
            Self::User(n) => 49 + n,
            Self::Rescue => 59,
            other => {
                let pos = TECHNICAL.iter().position(|l| *l == other).unwrap_or(0);
                32 + u8::try_from(pos).unwrap_or(0)
            }
        }
    }

    /// Builds a layer from its numeric KiCad id.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::FCu),
            1..=30 => Some(Self::In(id)),
            31 => Some(Self::BCu),
            32..=49 => Some(TECHNICAL[usize::from(id - 32)]),
            50..=58 => Some(Self::User(id - 49)),
            59 => Some(Self::Rescue),
            _ => None,
        }
    }

    /// Returns the canonical KiCad layer name (e.g. `F.Cu`, `In2.Cu`, `User.3`).
    #[must_use]
    pub fn name(self) -> String {
        match self {
            Self::In(n) => format!("In{n}.Cu"),
            Self::User(n) => format!("User.{n}"),
            other => other.fixed_name().to_string(),
        }
    }

    fn fixed_name(self) -> &'static str {
        match self {
            Self::FCu => "F.Cu",
            Self::BCu => "B.Cu",
            Self::BAdhes => "B.Adhes",
            Self::FAdhes => "F.Adhes",
            Self::BPaste => "B.Paste",
            Self::FPaste => "F.Paste",
            Self::BSilkS => "B.SilkS",
            Self::FSilkS => "F.SilkS",
            Self::BMask => "B.Mask",
            Self::FMask => "F.Mask",
            Self::DwgsUser => "Dwgs.User",
            Self::CmtsUser => "Cmts.User",
            Self::Eco1User => "Eco1.User",
            Self::Eco2User => "Eco2.User",
            Self::EdgeCuts => "Edge.Cuts",
            Self::Margin => "Margin",
            Self::BCrtYd => "B.CrtYd",
            Self::FCrtYd => "F.CrtYd",
            Self::BFab => "B.Fab",
            Self::FFab => "F.Fab",
            Self::Rescue => "Rescue",
            Self::In(_) | Self::User(_) => "",
        }
    }

    /// Parses a layer name. Accepts the KiCad 5 names and the KiCad 6 aliases
    /// (`F.Silkscreen`, `User.Drawings`, `F.Courtyard`, ...).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let fixed = match name {
            "F.Cu" => Some(Self::FCu),
            "B.Cu" => Some(Self::BCu),
            "B.Adhes" | "B.Adhesive" => Some(Self::BAdhes),
            "F.Adhes" | "F.Adhesive" => Some(Self::FAdhes),
            "B.Paste" => Some(Self::BPaste),
            "F.Paste" => Some(Self::FPaste),
            "B.SilkS" | "B.Silkscreen" => Some(Self::BSilkS),
            "F.SilkS" | "F.Silkscreen" => Some(Self::FSilkS),
            "B.Mask" => Some(Self::BMask),
            "F.Mask" => Some(Self::FMask),
            "Dwgs.User" | "User.Drawings" => Some(Self::DwgsUser),
            "Cmts.User" | "User.Comments" => Some(Self::CmtsUser),
            "Eco1.User" | "User.Eco1" => Some(Self::Eco1User),
            "Eco2.User" | "User.Eco2" => Some(Self::Eco2User),
            "Edge.Cuts" => Some(Self::EdgeCuts),
            "Margin" => Some(Self::Margin),
            "B.CrtYd" | "B.Courtyard" => Some(Self::BCrtYd),
            "F.CrtYd" | "F.Courtyard" => Some(Self::FCrtYd),
            "B.Fab" => Some(Self::BFab),
            "F.Fab" => Some(Self::FFab),
            "Rescue" => Some(Self::Rescue),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }
        if let Some(n) = name
            .strip_prefix("In")
            .and_then(|s| s.strip_suffix(".Cu"))
            .and_then(|s| s.parse::<u8>().ok())
        {
            return (1..=MAX_INNER_LAYERS).contains(&n).then_some(Self::In(n));
        }
        if let Some(n) = name.strip_prefix("User.").and_then(|s| s.parse::<u8>().ok()) {
            return (1..=MAX_USER_LAYERS).contains(&n).then_some(Self::User(n));
        }
        None
    }

    /// Returns true for copper layers.
    #[must_use]
    pub fn is_copper(self) -> bool {
        matches!(self, Self::FCu | Self::In(_) | Self::BCu)
    }

    /// Returns true for layers on the front side.
    #[must_use]
    pub fn is_front(self) -> bool {
        matches!(
            self,
            Self::FCu
                | Self::FAdhes
                | Self::FPaste
                | Self::FSilkS
                | Self::FMask
                | Self::FCrtYd
                | Self::FFab
        )
    }

    /// Returns true for layers on the back side.
    #[must_use]
    pub fn is_back(self) -> bool {
        matches!(
            self,
            Self::BCu
                | Self::BAdhes
                | Self::BPaste
                | Self::BSilkS
                | Self::BMask
                | Self::BCrtYd
                | Self::BFab
        )
    }

    /// Suffix used for plot file names (`F.Cu` -> `F_Cu`).
    #[must_use]
    pub fn suffix(self) -> String {
        self.name().replace('.', "_")
    }

    /// Stacking priority used when a page asks to sort its layers.
    ///
    /// Higher values are plotted first, so they end up at the bottom of the
    /// merged page.
    #[must_use]
    pub fn print_priority(self) -> u32 {
        match self {
            Self::BCu => 100,
            Self::In(n) => 100 - u32::from(n),
            Self::FCu => 60,
            Self::BAdhes | Self::BPaste => 55,
            Self::FAdhes | Self::FPaste => 54,
            Self::BMask => 53,
            Self::FMask => 52,
            Self::BSilkS => 51,
            Self::FSilkS => 50,
            Self::User(n) => 40 - u32::from(n),
            Self::DwgsUser | Self::CmtsUser | Self::Eco1User | Self::Eco2User => 25,
            Self::BCrtYd | Self::FCrtYd => 20,
            Self::BFab | Self::FFab => 15,
            Self::Margin => 12,
            Self::EdgeCuts => 10,
            Self::Rescue => 0,
        }
    }

    /// The layers every board has, in id order. Inner copper layers are
    /// not included, see [`Layer::copper`].
    pub fn technical() -> impl Iterator<Item = Self> {
        TECHNICAL.into_iter()
    }

    /// Copper layers of a board with `count` copper layers, front to back.
    #[must_use]
    pub fn copper(count: u8) -> Vec<Self> {
        let mut layers = vec![Self::FCu];
        let inner = count.saturating_sub(2).min(MAX_INNER_LAYERS);
        layers.extend((1..=inner).map(Self::In));
        if count > 1 {
            layers.push(Self::BCu);
        }
        layers
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for Layer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for Layer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::parse(&name).ok_or_else(|| serde::de::Error::custom(format!("unknown layer `{name}`")))
    }
}

/// A set of layers, stored as a bit mask indexed by layer id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LayerSet(u64);

impl LayerSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Creates a set holding the given layers.
    #[must_use]
    pub fn of(layers: &[Layer]) -> Self {
        let mut set = Self::new();
        for layer in layers {
            set.insert(*layer);
        }
        set
    }

    /// Adds a layer.
    pub fn insert(&mut self, layer: Layer) {
        self.0 |= 1u64 << layer.id();
    }

    /// Removes a layer.
    pub fn remove(&mut self, layer: Layer) {
        self.0 &= !(1u64 << layer.id());
    }

    /// Removes every layer present in `other`.
    pub fn remove_set(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns true if the layer is part of the set.
    #[must_use]
    pub fn contains(self, layer: Layer) -> bool {
        self.0 & (1u64 << layer.id()) != 0
    }

    /// Returns true if the set has no layers.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of layers in the set.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates the layers in id order.
    pub fn iter(self) -> impl Iterator<Item = Layer> {
        (0..64u8)
            .filter(move |id| self.0 & (1u64 << id) != 0)
            .filter_map(Layer::from_id)
    }

    /// Hexadecimal rendering of the mask, as used in debug logs.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    fn expand_wildcard(name: &str) -> Option<Vec<Layer>> {
        match name {
            "*.Cu" => Some(vec![Layer::FCu, Layer::BCu]),
            "*.Mask" => Some(vec![Layer::FMask, Layer::BMask]),
            "*.Paste" => Some(vec![Layer::FPaste, Layer::BPaste]),
            "*.SilkS" => Some(vec![Layer::FSilkS, Layer::BSilkS]),
            "*.Adhes" => Some(vec![Layer::FAdhes, Layer::BAdhes]),
            _ => None,
        }
    }
}

impl FromIterator<Layer> for LayerSet {
    fn from_iter<T: IntoIterator<Item = Layer>>(iter: T) -> Self {
        let mut set = Self::new();
        for layer in iter {
            set.insert(layer);
        }
        set
    }
}

impl Serialize for LayerSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(Layer::name))
    }
}

impl<'de> Deserialize<'de> for LayerSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        let mut set = Self::new();
        for name in &names {
            if let Some(layers) = Self::expand_wildcard(name) {
                layers.into_iter().for_each(|l| set.insert(l));
            } else {
                let layer = Layer::parse(name)
                    .ok_or_else(|| serde::de::Error::custom(format!("unknown layer `{name}`")))?;
                set.insert(layer);
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip() {
        for id in 0..60 {
            let layer = Layer::from_id(id).unwrap();
            assert_eq!(layer.id(), id, "{layer}");
        }
        assert!(Layer::from_id(60).is_none());
    }

    #[test]
    fn names_roundtrip() {
        for id in 0..60 {
            let layer = Layer::from_id(id).unwrap();
            assert_eq!(Layer::parse(&layer.name()), Some(layer));
        }
    }

    #[test]
    fn kicad6_aliases() {
        assert_eq!(Layer::parse("F.Silkscreen"), Some(Layer::FSilkS));
        assert_eq!(Layer::parse("User.Drawings"), Some(Layer::DwgsUser));
        assert_eq!(Layer::parse("B.Courtyard"), Some(Layer::BCrtYd));
        assert_eq!(Layer::parse("In31.Cu"), None);
        assert_eq!(Layer::parse("User.10"), None);
    }

    #[test]
    fn known_ids() {
        assert_eq!(Layer::FMask.id(), 39);
        assert_eq!(Layer::EdgeCuts.id(), 44);
        assert_eq!(Layer::FFab.id(), 49);
        assert_eq!(Layer::User(1).id(), 50);
    }

    #[test]
    fn suffix_replaces_dots() {
        assert_eq!(Layer::FCu.suffix(), "F_Cu");
        assert_eq!(Layer::In(2).suffix(), "In2_Cu");
    }

    #[test]
    fn copper_stack() {
        assert_eq!(Layer::copper(2), vec![Layer::FCu, Layer::BCu]);
        assert_eq!(
            Layer::copper(4),
            vec![Layer::FCu, Layer::In(1), Layer::In(2), Layer::BCu]
        );
        assert_eq!(Layer::copper(1), vec![Layer::FCu]);
    }

    #[test]
    fn layer_set_operations() {
        let mut set = LayerSet::of(&[Layer::FCu, Layer::FPaste, Layer::FMask]);
        assert_eq!(set.len(), 3);
        set.remove_set(LayerSet::of(&[Layer::FPaste, Layer::BPaste]));
        assert!(!set.contains(Layer::FPaste));
        assert!(set.contains(Layer::FCu));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Layer::FCu, Layer::FMask]);
    }

    #[test]
    fn layer_set_wildcards() {
        let set: LayerSet = serde_json::from_str(r#"["*.Cu", "*.Mask"]"#).unwrap();
        assert!(set.contains(Layer::FCu));
        assert!(set.contains(Layer::BCu));
        assert!(set.contains(Layer::BMask));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn layer_set_rejects_unknown() {
        let result: Result<LayerSet, _> = serde_json::from_str(r#"["F.Bogus"]"#);
        assert!(result.is_err());
    }
}
