//! Anti-forgery (CSRF) token lookup.
//!
//! Resolution order, first match wins:
//! 1. a hidden `csrfmiddlewaretoken` form field in the page markup,
//! 2. a `<meta name="csrf-token">` tag in the page markup,
//! 3. the `csrftoken` cookie, url-decoded.
//!
//! Nothing is cached: callers resolve again for every mutating request since
//! the token may rotate between page loads.

/// Header carrying the token on mutating requests.
pub const HEADER: &str = "X-CSRFToken";

const FORM_FIELD: &str = "csrfmiddlewaretoken";
const META_NAME: &str = "csrf-token";
const COOKIE_NAME: &str = "csrftoken";

/// Snapshot of the page markup and cookie header the token is read from.
#[derive(Clone, Debug, Default)]
pub struct PageContext {
    pub markup: Option<String>,
    pub cookies: Option<String>,
}

impl PageContext {
    /// Resolve the token, or an empty string when none is present.
    ///
    /// A missing token is not fatal: the server rejects the request and the
    /// caller reports that like any other failure.
    pub fn token(&self) -> String {
        let markup = self.markup.as_deref();
        if let Some(t) = markup.and_then(form_token) {
            return t;
        }
        if let Some(t) = markup.and_then(meta_token) {
            return t;
        }
        if let Some(t) = self.cookies.as_deref().and_then(cookie_token) {
            return t;
        }
        tracing::warn!("CSRF token not found in page markup or cookies");
        String::new()
    }
}

fn form_token(markup: &str) -> Option<String> {
    tags(markup, "input")
        .filter(|attrs| attr(attrs, "name") == Some(FORM_FIELD))
        .find_map(|attrs| attr(&attrs, "value").map(str::to_string))
        .filter(|t| !t.is_empty())
}

fn meta_token(markup: &str) -> Option<String> {
    tags(markup, "meta")
        .filter(|attrs| attr(attrs, "name") == Some(META_NAME))
        .find_map(|attrs| attr(&attrs, "content").map(str::to_string))
        .filter(|t| !t.is_empty())
}

fn cookie_token(cookies: &str) -> Option<String> {
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name.trim() != COOKIE_NAME || value.is_empty() {
            return None;
        }
        // Fall back to the raw value when it is not valid percent-encoding.
        Some(
            urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string()),
        )
    })
}

type Attrs<'a> = Vec<(String, &'a str)>;

fn attr<'a>(attrs: &[(String, &'a str)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
}

/// Attribute lists of every `<name ...>` tag in document order.
fn tags<'a>(markup: &'a str, name: &'a str) -> impl Iterator<Item = Attrs<'a>> + 'a {
    markup.split('<').skip(1).filter_map(move |chunk| {
        let body = chunk.split('>').next()?;
        let tag_len = body
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(body.len());
        if !body[..tag_len].eq_ignore_ascii_case(name) {
            return None;
        }
        Some(parse_attrs(&body[tag_len..]))
    })
}

/// Parse `key="v" key='v' key=v key` sequences.
fn parse_attrs(mut rest: &str) -> Attrs<'_> {
    let mut out = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if rest.is_empty() {
            return out;
        }
        let key_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let key = rest[..key_len].to_ascii_lowercase();
        rest = rest[key_len..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            out.push((key, ""));
            continue;
        };
        let after_eq = after_eq.trim_start();
        let (value, remaining) = match after_eq.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &after_eq[1..];
                match inner.find(q) {
                    Some(end) => (&inner[..end], &inner[end + 1..]),
                    None => (inner, ""),
                }
            }
            _ => {
                let end = after_eq
                    .find(char::is_whitespace)
                    .unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };
        out.push((key, value));
        rest = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(markup: Option<&str>, cookies: Option<&str>) -> PageContext {
        PageContext {
            markup: markup.map(str::to_string),
            cookies: cookies.map(str::to_string),
        }
    }

    #[test]
    fn test_form_field_wins() {
        let html = r#"<head><meta name="csrf-token" content="META"></head>
            <form><input type="hidden" name="csrfmiddlewaretoken" value="FORM"></form>"#;
        assert_eq!(ctx(Some(html), Some("csrftoken=COOKIE")).token(), "FORM");
    }

    #[test]
    fn test_meta_before_cookie() {
        let html = r#"<META content='META' name='csrf-token' />"#;
        assert_eq!(ctx(Some(html), Some("csrftoken=COOKIE")).token(), "META");
    }

    #[test]
    fn test_cookie_is_url_decoded() {
        let cookies = "sessionid=abc; csrftoken=a%2Bb%3Dc; theme=dark";
        assert_eq!(ctx(Some("<p>no token</p>"), Some(cookies)).token(), "a+b=c");
    }

    #[test]
    fn test_missing_token_is_empty() {
        assert_eq!(ctx(None, None).token(), "");
        assert_eq!(ctx(Some("<input name=other value=x>"), Some("a=b")).token(), "");
    }

    #[test]
    fn test_unquoted_and_boolean_attributes() {
        let html = "<input disabled name=csrfmiddlewaretoken value=XYZ>";
        assert_eq!(ctx(Some(html), None).token(), "XYZ");
    }
}
