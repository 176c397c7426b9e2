//! Command vocabularies advertised by the installed processors.
//!
//! A processor only declares which parameter names it understands and how
//! each value is validated. The pixel work itself lives behind
//! [`ImageTransformer`](crate::application::transform::ImageTransformer).

use super::commands::Command;

/// Largest accepted output dimension in pixels.
pub const MAX_DIMENSION: u32 = 10_000;

/// Validation rule for a single command value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Positive integer no larger than [`MAX_DIMENSION`].
    Dimension,
    /// Integer within an inclusive range.
    Integer { min: u32, max: u32 },
    /// One of a fixed set of lowercase values, with optional aliases.
    Choice {
        values: &'static [&'static str],
        aliases: &'static [(&'static str, &'static str)],
    },
    /// Hex (`rgb`, `rgba`, `rrggbb`, `rrggbbaa`) or a named color.
    Color,
    /// Two fractions in `[0, 1]` written as `x,y`.
    Point,
    /// Boolean flag.
    Flag,
}

/// A command name together with its value rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl CommandSpec {
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind }
    }

    /// Validate `raw` and return the command in canonical form, or `None`
    /// when the value does not satisfy the rule.
    pub fn parse(&self, raw: &str) -> Option<Command> {
        let value = self.kind.canonicalize(raw.trim())?;
        Some(Command::new(self.name, value))
    }
}

impl ParamKind {
    fn canonicalize(&self, raw: &str) -> Option<String> {
        match self {
            ParamKind::Dimension => {
                let value: u32 = raw.parse().ok()?;
                (1..=MAX_DIMENSION)
                    .contains(&value)
                    .then(|| value.to_string())
            }
            ParamKind::Integer { min, max } => {
                let value: u32 = raw.parse().ok()?;
                (*min..=*max).contains(&value).then(|| value.to_string())
            }
            ParamKind::Choice { values, aliases } => {
                let lowered = raw.to_ascii_lowercase();
                if let Some((_, target)) = aliases.iter().find(|(alias, _)| *alias == lowered) {
                    return Some((*target).to_string());
                }
                values
                    .iter()
                    .find(|value| **value == lowered)
                    .map(|value| (*value).to_string())
            }
            ParamKind::Color => parse_color(raw),
            ParamKind::Point => {
                let (x, y) = raw.split_once(',')?;
                let x = parse_fraction(x)?;
                let y = parse_fraction(y)?;
                Some(format!("{x},{y}"))
            }
            ParamKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some("true".to_string()),
                "false" | "0" | "no" | "off" => Some("false".to_string()),
                _ => None,
            },
        }
    }
}

fn parse_fraction(raw: &str) -> Option<f32> {
    let value: f32 = raw.trim().parse().ok()?;
    (value.is_finite() && (0.0..=1.0).contains(&value)).then_some(value)
}

const NAMED_COLORS: &[(&str, &str)] = &[
    ("black", "000000ff"),
    ("white", "ffffffff"),
    ("red", "ff0000ff"),
    ("green", "008000ff"),
    ("lime", "00ff00ff"),
    ("blue", "0000ffff"),
    ("yellow", "ffff00ff"),
    ("gray", "808080ff"),
    ("grey", "808080ff"),
    ("silver", "c0c0c0ff"),
    ("orange", "ffa500ff"),
    ("purple", "800080ff"),
    ("transparent", "00000000"),
];

fn parse_color(raw: &str) -> Option<String> {
    let lowered = raw.to_ascii_lowercase();
    if let Some((_, hex)) = NAMED_COLORS.iter().find(|(name, _)| *name == lowered) {
        return Some((*hex).to_string());
    }

    let hex = lowered.strip_prefix('#').unwrap_or(&lowered);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    match hex.len() {
        3 | 4 => {
            let mut expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
            if hex.len() == 3 {
                expanded.push_str("ff");
            }
            Some(expanded)
        }
        6 => Some(format!("{hex}ff")),
        8 => Some(hex.to_string()),
        _ => None,
    }
}

/// A named processor and the commands it understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSpec {
    pub name: &'static str,
    pub commands: &'static [CommandSpec],
}

pub const RESIZE: ProcessorSpec = ProcessorSpec {
    name: "resize",
    commands: &[
        CommandSpec::new("width", ParamKind::Dimension),
        CommandSpec::new("height", ParamKind::Dimension),
        CommandSpec::new(
            "rmode",
            ParamKind::Choice {
                values: &["crop", "pad", "boxpad", "max", "min", "stretch", "manual"],
                aliases: &[],
            },
        ),
        CommandSpec::new(
            "ranchor",
            ParamKind::Choice {
                values: &[
                    "center",
                    "top",
                    "bottom",
                    "left",
                    "right",
                    "topleft",
                    "topright",
                    "bottomleft",
                    "bottomright",
                ],
                aliases: &[],
            },
        ),
        CommandSpec::new("rxy", ParamKind::Point),
        CommandSpec::new("compand", ParamKind::Flag),
    ],
};

pub const FORMAT: ProcessorSpec = ProcessorSpec {
    name: "format",
    commands: &[CommandSpec::new(
        "format",
        ParamKind::Choice {
            values: &["bmp", "gif", "jpg", "png", "tga", "webp"],
            aliases: &[("jpeg", "jpg")],
        },
    )],
};

pub const BACKGROUND_COLOR: ProcessorSpec = ProcessorSpec {
    name: "background_color",
    commands: &[CommandSpec::new("bgcolor", ParamKind::Color)],
};

pub const QUALITY: ProcessorSpec = ProcessorSpec {
    name: "quality",
    commands: &[CommandSpec::new(
        "quality",
        ParamKind::Integer { min: 1, max: 100 },
    )],
};

/// All processors shipped with the crate, in registration order.
pub const BUILTIN_PROCESSORS: [&ProcessorSpec; 4] = [&RESIZE, &FORMAT, &BACKGROUND_COLOR, &QUALITY];

/// Look up a built-in processor by name.
pub fn builtin(name: &str) -> Option<&'static ProcessorSpec> {
    BUILTIN_PROCESSORS
        .iter()
        .copied()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(processor: &ProcessorSpec, name: &str) -> CommandSpec {
        *processor
            .commands
            .iter()
            .find(|spec| spec.name == name)
            .expect("command advertised")
    }

    #[test]
    fn dimension_rejects_zero_and_oversized_values() {
        let width = spec(&RESIZE, "width");
        assert_eq!(width.parse("300").map(|c| c.value), Some("300".into()));
        assert_eq!(width.parse(" 0042 ").map(|c| c.value), Some("42".into()));
        assert!(width.parse("0").is_none());
        assert!(width.parse("-5").is_none());
        assert!(width.parse("10001").is_none());
        assert!(width.parse("12px").is_none());
    }

    #[test]
    fn format_accepts_alias_and_is_case_insensitive() {
        let format = spec(&FORMAT, "format");
        assert_eq!(format.parse("JPEG").map(|c| c.value), Some("jpg".into()));
        assert_eq!(format.parse("WebP").map(|c| c.value), Some("webp".into()));
        assert!(format.parse("svg").is_none());
    }

    #[test]
    fn colors_normalize_to_rrggbbaa() {
        let color = spec(&BACKGROUND_COLOR, "bgcolor");
        let parse = |raw: &str| color.parse(raw).map(|c| c.value);

        assert_eq!(parse("#FFF"), Some("ffffffff".into()));
        assert_eq!(parse("f008"), Some("ff000088".into()));
        assert_eq!(parse("336699"), Some("336699ff".into()));
        assert_eq!(parse("33669980"), Some("33669980".into()));
        assert_eq!(parse("Transparent"), Some("00000000".into()));
        assert!(parse("12345").is_none());
        assert!(parse("zzzzzz").is_none());
    }

    #[test]
    fn point_requires_two_fractions() {
        let rxy = spec(&RESIZE, "rxy");
        assert_eq!(rxy.parse("0.5, 0.25").map(|c| c.value), Some("0.5,0.25".into()));
        assert!(rxy.parse("0.5").is_none());
        assert!(rxy.parse("1.5,0").is_none());
        assert!(rxy.parse("NaN,0").is_none());
    }

    #[test]
    fn flags_and_quality() {
        assert_eq!(
            spec(&RESIZE, "compand").parse("YES").map(|c| c.value),
            Some("true".into())
        );
        assert!(spec(&RESIZE, "compand").parse("maybe").is_none());
        assert!(spec(&QUALITY, "quality").parse("0").is_none());
        assert_eq!(
            spec(&QUALITY, "quality").parse("85").map(|c| c.value),
            Some("85".into())
        );
    }

    #[test]
    fn builtin_lookup_by_name() {
        assert_eq!(builtin("Resize"), Some(&RESIZE));
        assert!(builtin("sharpen").is_none());
    }
}
