/// A predefined backdrop/lighting instruction the user picks by id. The set
/// is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePreset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
    pub icon: &'static str,
}

pub const DEFAULT_STYLE_ID: &str = "corp-grey";

pub const STYLE_PRESETS: [StylePreset; 4] = [
    StylePreset {
        id: "corp-grey",
        name: "Corporate Classic",
        description: "Neutral grey studio backdrop",
        prompt: "Neutral professional grey studio backdrop, soft Rembrandt lighting, business attire.",
        icon: "🏢",
    },
    StylePreset {
        id: "modern-office",
        name: "Modern Tech",
        description: "Bright office with soft bokeh",
        prompt: "Modern high-tech office background with depth of field blur, natural bright window lighting, smart casual professional attire.",
        icon: "💻",
    },
    StylePreset {
        id: "natural-outdoor",
        name: "Natural Light",
        description: "Outdoor park or urban setting",
        prompt: "Warm natural outdoor lighting, blurred park and greenery background, friendly and approachable professional portrait.",
        icon: "🌿",
    },
    StylePreset {
        id: "luxury-loft",
        name: "Luxury Executive",
        description: "Elegant penthouse interior",
        prompt: "Elegant high-end penthouse interior background, warm architectural lighting, luxury professional aesthetic.",
        icon: "💎",
    },
];

pub fn find_style(id: &str) -> Option<&'static StylePreset> {
    STYLE_PRESETS.iter().find(|style| style.id == id)
}
