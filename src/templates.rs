//! Page rendering
//!
//! The confirmation page shown after a direct-mode login is loaded from
//! `login.html` in the configured templates folder. Placeholders of the form
//! `{{name}}` are replaced with HTML-escaped identity fields.

use crate::models::Identity;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

/// File name of the login confirmation template
pub const LOGIN_TEMPLATE: &str = "login.html";

/// Renders the pages the discharger shows to users
pub trait PageRenderer: Send + Sync {
    /// Render the page confirming a successful login for `identity`
    ///
    /// # Errors
    ///
    /// Returns an error if the template is missing or cannot be rendered
    fn render_login(&self, identity: &Identity) -> Result<String>;
}

/// Renders templates from a folder on disk
///
/// Templates are read on every render so they can be edited without a
/// restart.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    folder: PathBuf,
}

impl TemplateRenderer {
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    fn load(&self, name: &str) -> Result<String> {
        let path = self.folder.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read template {}", path.display()))
    }
}

impl PageRenderer for TemplateRenderer {
    fn render_login(&self, identity: &Identity) -> Result<String> {
        let template = self.load(LOGIN_TEMPLATE)?;
        render(&template, |name| match name {
            "username" => Some(identity.username.clone()),
            "name" => Some(identity.name.clone().unwrap_or_default()),
            "email" => Some(identity.email.clone().unwrap_or_default()),
            "groups" => Some(identity.groups.join(", ")),
            _ => None,
        })
    }
}

/// Substitute `{{name}}` placeholders using `lookup`
///
/// # Errors
///
/// Returns an error for unterminated or unknown placeholders
pub fn render<F>(template: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| anyhow!("Unterminated placeholder in template"))?;
        let name = after[..end].trim();
        let value = lookup(name).ok_or_else(|| anyhow!("Unknown template placeholder: {name}"))?;
        out.push_str(&html_escape(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Escape text for inclusion in HTML content or attribute values
#[must_use]
pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_login_from_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(LOGIN_TEMPLATE),
            "<p>Logged in as {{ username }} ({{groups}})</p>",
        )
        .unwrap();

        let renderer = TemplateRenderer::new(dir.path());
        let identity = Identity {
            groups: vec!["a".to_string(), "b".to_string()],
            ..Identity::new("<alice>")
        };
        let page = renderer.render_login(&identity).unwrap();
        assert_eq!(page, "<p>Logged in as &lt;alice&gt; (a, b)</p>");
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = TemplateRenderer::new(dir.path());
        assert!(renderer.render_login(&Identity::new("alice")).is_err());
    }

    #[test]
    fn test_unknown_and_unterminated_placeholders() {
        assert!(render("{{nope}}", |_| None).is_err());
        assert!(render("{{username", |_| Some(String::new())).is_err());
        assert_eq!(render("plain", |_| None).unwrap(), "plain");
    }
}
