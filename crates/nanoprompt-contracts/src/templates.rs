/// One of the fixed prompt archetypes the rewriting agent chooses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub id: u8,
    pub name: &'static str,
    pub selection_rule: &'static str,
    pub body: &'static str,
    /// Lower-case words that signal this template in a raw prompt. Only the
    /// offline dryrun agent looks at these.
    pub cues: &'static [&'static str],
}

pub const TEMPLATES: &[PromptTemplate] = &[
    PromptTemplate {
        id: 1,
        name: "Photorealistic Scene",
        selection_rule: "If the user implies \"make a photo\".",
        body: "Ultra-realistic [shot type] of [subject], [action or expression], in [environment].\n\
Lighting: [natural/artificial/cinematic] with [light quality, direction, color] creating a [mood] atmosphere.\n\
Camera: [lens focal length, aperture] emphasizing [textures/features/motion].\n\
Background: [setting & depth of field].\n\
Post: [film grain/HDR/color grade].\n\
Aspect ratio: [16:9/4:5/1:1].\n\
No watermarks, text, or logos.",
        cues: &["photo", "photograph", "realistic", "shot of", "picture of"],
    },
    PromptTemplate {
        id: 2,
        name: "Stylized Illustration / Sticker",
        selection_rule: "If \"sticker\", \"flat illustration\" or \"cartoon badge\".",
        body: "High-resolution [style] illustration of [subject], sticker-ready with transparent background.\n\
Line: [thin/clean/thick/sketchy].\n\
Shading: [flat/cel/painterly/crosshatch].\n\
Palette: [color scheme].\n\
Design emphasis: [exaggerated features/cute motifs/silhouette].\n\
Framing: [centered/off-center].\n\
Crisp edges and strong silhouette.",
        cues: &["sticker", "flat illustration", "cartoon", "badge", "emoji"],
    },
    PromptTemplate {
        id: 3,
        name: "Accurate Text in Image",
        selection_rule: "If the output must contain exact text (poster/logo/packaging/UI).",
        body: "Design a [poster/logo/packaging/UI] for [brand/concept].\n\
Main text: \"[exact text]\" in [font style or hand-lettered].\n\
Composition: [hierarchy & layout].\n\
Style: [minimalist/futuristic/retro/corporate].\n\
Palette: [colors].\n\
Ensure text is sharp, readable, and correctly spelled.\n\
Aspect ratio: [A4/square/widescreen].\n\
No extra words or watermarks.",
        cues: &["poster", "logo", "packaging", "headline", "text that says", "typography"],
    },
    PromptTemplate {
        id: 4,
        name: "Product Mockup / Commercial",
        selection_rule: "If it is a store/product shot, packshot, or mock.",
        body: "Studio-lit photo of [product] on [surface/background].\n\
Lighting: [three-point/softbox/daylight] to highlight [feature].\n\
Angle: [top/eye-level/45°].\n\
Focus: sharp on [detail/logo/texture], DoF background blur.\n\
Mood: [luxury/eco/tech/casual].\n\
Post: [clean retouch/reflection/vignette].\n\
Aspect ratio: [16:9/4:5].\n\
Must look professional and real.",
        cues: &["product", "packshot", "mockup", "mock-up", "commercial", "store"],
    },
    PromptTemplate {
        id: 5,
        name: "Minimalist & Negative Space",
        selection_rule: "If they emphasize emptiness, simplicity, or negative space.",
        body: "Minimalist composition with a single [subject] at [frame position].\n\
Background: [flat or subtle gradient color].\n\
Lighting: soft diffuse, no harsh shadows.\n\
Design focus: strong negative space and balance.\n\
Mood: [calm/futuristic/abstract].\n\
Aspect ratio: [poster/square].\n\
No extra elements.",
        cues: &["minimalist", "minimal", "negative space", "simple", "empty"],
    },
    PromptTemplate {
        id: 6,
        name: "Sequential Art (Comics/Manga)",
        selection_rule: "If they ask for comic/manga/storyboard/panels.",
        body: "Single [comic/manga] page, right-to-left, [3–5] panels, clean inks, grayscale screentones, high contrast.\n\
ONLY ENGLISH text. Hand-lettered balloons + caption boxes. Clean gutters. No watermark.\n\
CAST & SET: [characters & place].\n\
PANEL 1: [camera angle] [action]. — Speech: \"[line 1]\" — Caption: \"[short hook]\" — SFX: \"[onomatopoeia]\"\n\
PANEL 2: [new focus/reveal]. — Speech: \"[line 2]\"\n\
PANEL 3: [close-up key detail/expression]. — Speech: \"[line 3]\" — Caption: \"[label]\"\n\
PANEL 4: [payoff moment]. — Speech A: \"[line 4a]\" — Speech B: \"[line 4b]\" — Footer: \"[takeaway]\"\n\
Aspect ratio: [3:4 or 4:5]. Short, readable text. No extra panels.",
        cues: &["comic", "manga", "storyboard", "panel", "panels"],
    },
    PromptTemplate {
        id: 7,
        name: "Editing / Inpainting",
        selection_rule: "If they want to edit an uploaded image (add/remove/replace).",
        body: "Using the provided image of [subject]:\n\
Task: [add/remove/replace/modify] [element] at [location].\n\
Integrate with matching style, perspective, and lighting.\n\
Preserve all other details untouched.\n\
Output must be seamless, no artifacts.",
        cues: &["remove", "replace", "erase", "edit", "inpaint"],
    },
    PromptTemplate {
        id: 8,
        name: "Style Transfer",
        selection_rule: "If they want \"in the style of X\" applied to a provided image.",
        body: "Transform the provided image of [subject] into the style of [artist/movement/medium].\n\
Preserve composition, anatomy, and proportions.\n\
Apply [brushstroke/texture/palette/linework] consistent with the reference style.\n\
Do not distort faces/key objects.\n\
Keep original aspect ratio.",
        cues: &["in the style of", "style transfer", "restyle", "as a painting"],
    },
    PromptTemplate {
        id: 9,
        name: "Multi-Image Composition",
        selection_rule: "If combining more than one provided image.",
        body: "Combine provided images: place [element A from image 1] with/on [element B from image 2].\n\
Unify lighting, shadows, and color balance.\n\
Keep key details sharp; blend backgrounds smoothly.\n\
Final scene: [description].",
        cues: &["combine", "merge", "both images", "together with"],
    },
    PromptTemplate {
        id: 10,
        name: "High-Fidelity Insert",
        selection_rule: "If inserting an element but preserving base image fidelity.",
        body: "Base: [image 1]. Insert [element from image 2] into [specific location].\n\
Do NOT alter base subject’s details, textures, or lighting.\n\
Inserted element must inherit [light direction, color tone, shadow].\n\
Final must look like an untouched original.",
        cues: &["insert", "place into", "keep the base", "unchanged"],
    },
];

/// Read-only view over the built-in template set.
#[derive(Debug, Clone, Copy)]
pub struct TemplateCatalog {
    templates: &'static [PromptTemplate],
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog {
    pub fn builtin() -> Self {
        Self {
            templates: TEMPLATES,
        }
    }

    pub fn get(&self, id: u8) -> Option<&'static PromptTemplate> {
        self.templates.iter().find(|template| template.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&'static PromptTemplate> {
        let wanted = name.trim();
        self.templates
            .iter()
            .find(|template| template.name.eq_ignore_ascii_case(wanted))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static PromptTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// `- <rule> → #<id> <name>.` per template, in catalog order.
    pub fn render_decision_rules(&self) -> String {
        self.templates
            .iter()
            .map(|template| {
                format!(
                    "- {} → #{} {}.",
                    template.selection_rule.trim_end_matches('.'),
                    template.id,
                    template.name
                )
            })
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn render_library(&self) -> String {
        self.templates
            .iter()
            .map(|template| format!("[{}] {}\n\"{}\"", template.id, template.name, template.body))
            .collect::<Vec<String>>()
            .join("\n\n")
    }
}
