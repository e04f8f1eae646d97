//! Message template rendering, e.g. `"Hello {Name}"` against event properties.

use crate::event::{PropertyValue, Scalar};
use crate::simplify::scalar_key;
use chrono::format::{Item, StrftimeItems};
use chrono::SecondsFormat;
use std::fmt::Write as _;

/// Error raised when a property cannot be rendered with the requested format.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("format specifier `{format}` is not supported for {kind} values")]
    Unsupported { format: String, kind: &'static str },

    #[error("invalid format specifier `{0}`")]
    Invalid(String),
}

/// Renders scalar values into message text.
pub trait FormatProvider: Send + Sync {
    fn format(&self, value: &Scalar, format: Option<&str>) -> Result<String, FormatError>;
}

/// Culture-neutral formatting.
///
/// Supported specifiers: `F<n>`/`N<n>` (fixed decimals) for numbers, `D<n>`
/// (zero padding) and `X`/`x` (hex) for integers, strftime patterns for
/// datetimes. Strings, booleans and text values ignore the specifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantFormat;

impl FormatProvider for InvariantFormat {
    fn format(&self, value: &Scalar, format: Option<&str>) -> Result<String, FormatError> {
        let Some(format) = format.filter(|f| !f.is_empty()) else {
            return Ok(canonical(value));
        };

        match value {
            Scalar::I64(i) => format_integer(i128::from(*i), format),
            Scalar::U64(u) => format_integer(i128::from(*u), format),
            Scalar::F64(f) => format_float(*f, format),
            Scalar::DateTime(ts) => {
                let items: Vec<Item> = StrftimeItems::new(format).collect();
                if items.iter().any(|item| matches!(item, Item::Error)) {
                    return Err(FormatError::Invalid(format.to_string()));
                }
                let mut out = String::new();
                write!(out, "{}", ts.format_with_items(items.into_iter()))
                    .map_err(|_| FormatError::Invalid(format.to_string()))?;
                Ok(out)
            }
            Scalar::Null | Scalar::Bool(_) | Scalar::Str(_) | Scalar::Char(_) | Scalar::Text(_) => {
                Ok(canonical(value))
            }
        }
    }
}

fn canonical(value: &Scalar) -> String {
    match value {
        Scalar::Null => "null".to_string(),
        Scalar::DateTime(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, false),
        Scalar::Str(s) | Scalar::Text(s) => s.clone(),
        other => scalar_key(other),
    }
}

/// Largest precision or width accepted in a numeric specifier.
pub const MAX_SPECIFIER_DIGITS: usize = 99;

// Splits "F2" into ('F', Some(2)); a bare letter has no precision.
fn parse_specifier(format: &str) -> Result<(char, Option<usize>), FormatError> {
    let invalid = || FormatError::Invalid(format.to_string());
    let mut chars = format.chars();
    let letter = chars.next().ok_or_else(invalid)?;
    let rest = chars.as_str();
    if rest.is_empty() {
        return Ok((letter, None));
    }
    match rest.parse::<usize>() {
        Ok(n) if n <= MAX_SPECIFIER_DIGITS => Ok((letter, Some(n))),
        _ => Err(invalid()),
    }
}

fn format_integer(value: i128, format: &str) -> Result<String, FormatError> {
    match parse_specifier(format)? {
        ('D' | 'd', width) => {
            let width = width.unwrap_or(0);
            if value < 0 {
                Ok(format!("-{:0width$}", -value, width = width))
            } else {
                Ok(format!("{:0width$}", value, width = width))
            }
        }
        ('X', width) if value >= 0 => Ok(format!("{:0width$X}", value, width = width.unwrap_or(0))),
        ('x', width) if value >= 0 => Ok(format!("{:0width$x}", value, width = width.unwrap_or(0))),
        ('F' | 'f' | 'N' | 'n', _) => format_float(value as f64, format),
        _ => Err(FormatError::Unsupported {
            format: format.to_string(),
            kind: "integer",
        }),
    }
}

fn format_float(value: f64, format: &str) -> Result<String, FormatError> {
    match parse_specifier(format)? {
        ('F' | 'f' | 'N' | 'n', precision) => {
            Ok(format!("{:.prec$}", value, prec = precision.unwrap_or(2)))
        }
        _ => Err(FormatError::Unsupported {
            format: format.to_string(),
            kind: "floating point",
        }),
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Property {
        raw: &'a str,
        name: &'a str,
        format: Option<&'a str>,
    },
}

fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while !rest.is_empty() {
        let Some(pos) = rest.find(&['{', '}'][..]) else {
            tokens.push(Token::Text(rest));
            break;
        };
        if pos > 0 {
            tokens.push(Token::Text(&rest[..pos]));
            rest = &rest[pos..];
        }

        if rest.starts_with("{{") {
            tokens.push(Token::Text("{"));
            rest = &rest[2..];
        } else if rest.starts_with("}}") {
            tokens.push(Token::Text("}"));
            rest = &rest[2..];
        } else if rest.starts_with('}') {
            tokens.push(Token::Text("}"));
            rest = &rest[1..];
        } else {
            match rest[1..].find(&['{', '}'][..]) {
                Some(end) if rest.as_bytes()[end + 1] == b'}' => {
                    let raw = &rest[..end + 2];
                    match parse_property(&rest[1..end + 1]) {
                        Some((name, format)) => tokens.push(Token::Property { raw, name, format }),
                        None => tokens.push(Token::Text(raw)),
                    }
                    rest = &rest[end + 2..];
                }
                Some(end) => {
                    // Another '{' before the closing brace: treat the prefix as text.
                    tokens.push(Token::Text(&rest[..end + 1]));
                    rest = &rest[end + 1..];
                }
                None => {
                    tokens.push(Token::Text(rest));
                    break;
                }
            }
        }
    }

    tokens
}

// Accepts `Name`, `@Name`, `$Name`, `Name:format`, `Name,alignment`.
fn parse_property(inner: &str) -> Option<(&str, Option<&str>)> {
    let inner = inner.strip_prefix(&['@', '$'][..]).unwrap_or(inner);
    let (head, format) = match inner.split_once(':') {
        Some((head, format)) => (head, Some(format)),
        None => (inner, None),
    };
    let name = head.split_once(',').map(|(name, _)| name).unwrap_or(head);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    valid.then_some((name, format))
}

/// Double every brace in `text` so that [`render`] reproduces it verbatim.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '{' || c == '}' {
            out.push(c);
        }
        out.push(c);
    }
    out
}

/// Render `template` against `properties`.
///
/// Unknown property names and malformed tokens are rendered verbatim.
pub fn render(
    template: &str,
    properties: &[(String, PropertyValue)],
    provider: &dyn FormatProvider,
) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len());

    for token in tokenize(template) {
        match token {
            Token::Text(text) => out.push_str(text),
            Token::Property { raw, name, format } => {
                match properties.iter().find(|(key, _)| key == name) {
                    Some((_, PropertyValue::Scalar(scalar))) => {
                        out.push_str(&provider.format(scalar, format)?)
                    }
                    Some((_, value)) => render_nested(value, provider, &mut out)?,
                    None => out.push_str(raw),
                }
            }
        }
    }

    Ok(out)
}

fn render_nested(
    value: &PropertyValue,
    provider: &dyn FormatProvider,
    out: &mut String,
) -> Result<(), FormatError> {
    match value {
        PropertyValue::Scalar(Scalar::Str(s)) => out.push_str(&serde_json::Value::from(s.as_str()).to_string()),
        PropertyValue::Scalar(scalar) => out.push_str(&provider.format(scalar, None)?),
        PropertyValue::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_nested(item, provider, out)?;
            }
            out.push(']');
        }
        PropertyValue::Mapping(entries) => {
            out.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_nested(&PropertyValue::Scalar(key.clone()), provider, out)?;
                out.push_str(": ");
                render_nested(value, provider, out)?;
            }
            out.push('}');
        }
        PropertyValue::Structure { type_tag, fields } => {
            if let Some(tag) = type_tag {
                out.push_str(tag);
                out.push(' ');
            }
            out.push_str("{ ");
            for (i, (name, value)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                render_nested(value, provider, out)?;
            }
            out.push_str(" }");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn props(entries: Vec<(&str, PropertyValue)>) -> Vec<(String, PropertyValue)> {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn renders_named_properties_unquoted() {
        let properties = props(vec![("Name", "Ada".into())]);
        let rendered = render("Hello {Name}", &properties, &InvariantFormat).unwrap();
        assert_eq!(rendered, "Hello Ada");
    }

    #[test]
    fn missing_properties_and_escapes_are_left_alone() {
        let rendered = render("{{literal}} {Missing} {unclosed", &[], &InvariantFormat).unwrap();
        assert_eq!(rendered, "{literal} {Missing} {unclosed");
    }

    #[test]
    fn destructure_and_alignment_prefixes_are_ignored() {
        let properties = props(vec![("User", "ada".into()), ("0", 42i64.into())]);
        let rendered = render("{@User} {$User} {User,10} #{0}", &properties, &InvariantFormat).unwrap();
        assert_eq!(rendered, "ada ada ada #42");
    }

    #[test]
    fn numeric_and_date_formats() {
        let ts = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .unwrap();
        let properties = props(vec![
            ("Elapsed", 12.3456f64.into()),
            ("Id", 255i64.into()),
            ("At", Scalar::DateTime(ts).into()),
        ]);
        let rendered = render(
            "{Elapsed:F2} {Id:X} {Id:D5} {At:%Y-%m-%d}",
            &properties,
            &InvariantFormat,
        )
        .unwrap();
        assert_eq!(rendered, "12.35 FF 00255 2024-01-02");
    }

    #[test]
    fn unsupported_format_is_an_error() {
        let properties = props(vec![("Count", 3i64.into())]);
        let err = render("{Count:Q}", &properties, &InvariantFormat).unwrap_err();
        assert_eq!(
            err,
            FormatError::Unsupported {
                format: "Q".into(),
                kind: "integer"
            }
        );
    }

    #[test]
    fn escaped_text_renders_verbatim() {
        let properties = props(vec![("n", 1i64.into())]);
        let text = "fmt was {n:?} and {n} }{ {{";
        let rendered = render(&escape(text), &properties, &InvariantFormat).unwrap();
        assert_eq!(rendered, text);
    }

    #[test]
    fn oversized_precision_and_width_are_invalid() {
        let properties = props(vec![("Ratio", 1.5f64.into()), ("Count", 1i64.into())]);

        for template in ["{Ratio:F70000}", "{Count:D70000}", "{Count:X100}", "{Count:N99999999999999999999}"] {
            let err = render(template, &properties, &InvariantFormat).unwrap_err();
            assert!(matches!(err, FormatError::Invalid(_)), "{} gave {:?}", template, err);
        }

        let widest = format!("{{Count:D{}}}", MAX_SPECIFIER_DIGITS);
        let rendered = render(&widest, &properties, &InvariantFormat).unwrap();
        assert_eq!(rendered.len(), MAX_SPECIFIER_DIGITS);
    }

    #[test]
    fn nested_values_render_with_quoted_strings() {
        let properties = props(vec![
            ("Tags", vec!["a", "b"].into()),
            (
                "Point",
                PropertyValue::Structure {
                    type_tag: Some("Point".into()),
                    fields: vec![("X".into(), 1i64.into()), ("Y".into(), 2i64.into())],
                },
            ),
            ("Map", PropertyValue::mapping([("k", 1i64)])),
        ]);
        let rendered = render("{Tags} {Point} {Map}", &properties, &InvariantFormat).unwrap();
        assert_eq!(rendered, r#"["a", "b"] Point { X: 1, Y: 2 } {"k": 1}"#);
    }
}
