//! `{{...}}` template substitution for custom commands.
//!
//! Vocabulary: `input`, `input.<n>` (whitespace-split word), `input.rest`,
//! `user.id|username|displayName`, `channel.id|name`, `timestamp`, `date`,
//! `datetime`. URL templates percent-encode every substituted value; header
//! and body templates substitute raw.

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Everything a command template may reference.
#[derive(Debug, Default, Clone)]
pub struct InterpolationContext {
    pub input: String,
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub channel_id: String,
    pub channel_name: String,
}

/// Raw substitution for header values and request bodies.
pub fn interpolate(template: &str, ctx: &InterpolationContext) -> String {
    render(template, ctx, false)
}

/// URL-safe substitution: values are percent-encoded.
pub fn interpolate_url(template: &str, ctx: &InterpolationContext) -> String {
    render(template, ctx, true)
}

fn render(template: &str, ctx: &InterpolationContext, url_encode: bool) -> String {
    let encode = |value: &str| -> String {
        if url_encode {
            utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
        } else {
            value.to_string()
        }
    };

    let words: Vec<&str> = ctx.input.split_whitespace().collect();
    let rest = if words.len() > 1 {
        words[1..].join(" ")
    } else {
        String::new()
    };

    let mut out = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find("{{") {
        out.push_str(&remaining[..start]);
        let after = &remaining[start + 2..];

        let Some(end) = after.find("}}") else {
            // Unterminated placeholder: emit the rest verbatim.
            out.push_str(&remaining[start..]);
            remaining = "";
            break;
        };

        let name = &after[..end];
        match resolve(name, ctx, &words, &rest) {
            Some(value) => out.push_str(&encode(&value)),
            // Unknown variables render as empty, like unset word indexes.
            None => {}
        }

        remaining = &after[end + 2..];
    }
    out.push_str(remaining);
    out
}

fn resolve(
    name: &str,
    ctx: &InterpolationContext,
    words: &[&str],
    rest: &str,
) -> Option<String> {
    let now = Utc::now();
    Some(match name {
        "input" => ctx.input.clone(),
        "input.rest" => rest.to_string(),
        "user.id" => ctx.user_id.clone(),
        "user.username" => ctx.username.clone(),
        "user.displayName" => ctx.display_name.clone(),
        "channel.id" => ctx.channel_id.clone(),
        "channel.name" => ctx.channel_name.clone(),
        "timestamp" => now.timestamp().to_string(),
        "date" => now.format("%Y-%m-%d").to_string(),
        "datetime" => now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        _ => {
            let index: usize = name.strip_prefix("input.")?.parse().ok()?;
            words.get(index).copied().unwrap_or_default().to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> InterpolationContext {
        InterpolationContext {
            input: "berlin and hamburg".into(),
            user_id: "u-1".into(),
            username: "alice".into(),
            display_name: "Alice Example".into(),
            channel_id: "c-1".into(),
            channel_name: "general".into(),
        }
    }

    #[test]
    fn input_words_and_rest_substitute() {
        let ctx = ctx();
        assert_eq!(interpolate("q={{input.0}}", &ctx), "q=berlin");
        assert_eq!(interpolate("q={{input.2}}", &ctx), "q=hamburg");
        assert_eq!(interpolate("q={{input.9}}", &ctx), "q=");
        assert_eq!(interpolate("rest={{input.rest}}", &ctx), "rest=and hamburg");
        assert_eq!(
            interpolate("all: {{input}}", &ctx),
            "all: berlin and hamburg"
        );
    }

    #[test]
    fn user_and_channel_variables_substitute() {
        let ctx = ctx();
        assert_eq!(
            interpolate("{{user.username}}/{{user.displayName}}", &ctx),
            "alice/Alice Example"
        );
        assert_eq!(
            interpolate("{{channel.id}}:{{channel.name}}", &ctx),
            "c-1:general"
        );
    }

    #[test]
    fn url_interpolation_percent_encodes() {
        let mut ctx = ctx();
        ctx.input = "new york".into();
        assert_eq!(
            interpolate_url("https://api.example/q={{input}}", &ctx),
            "https://api.example/q=new%20york"
        );
        // Body templates stay raw.
        assert_eq!(
            interpolate("{\"q\": \"{{input}}\"}", &ctx),
            "{\"q\": \"new york\"}"
        );
    }

    #[test]
    fn time_variables_render() {
        let ctx = ctx();
        let rendered = interpolate("{{timestamp}}", &ctx);
        assert!(rendered.parse::<i64>().is_ok());

        let date = interpolate("{{date}}", &ctx);
        assert_eq!(date.len(), 10);

        let datetime = interpolate("{{datetime}}", &ctx);
        assert!(datetime.ends_with('Z'));
    }

    #[test]
    fn unknown_and_unterminated_placeholders() {
        let ctx = ctx();
        assert_eq!(interpolate("x={{mystery}}", &ctx), "x=");
        assert_eq!(interpolate("x={{input", &ctx), "x={{input");
    }
}
