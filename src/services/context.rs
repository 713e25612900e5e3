use serde_json::{json, Map, Value};

use crate::models::user::{Player, UserAccount};

/// Template variables, rendered by handlebars.
pub type TemplateContext = Map<String, Value>;

const LOCAL_BASE: &str = "http://localhost:8000";

/// Public site location used to turn relative deep links into absolute ones.
#[derive(Debug, Clone, Default)]
pub struct SiteUrls {
    pub base_url: Option<String>,
    pub domain: Option<String>,
    /// Selects `https` when only a bare domain is configured.
    pub secure: bool,
}

impl SiteUrls {
    fn protocol(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    fn bare_domain(&self) -> Option<&str> {
        self.domain
            .as_deref()
            .map(|d| d.trim_start_matches('/'))
            .filter(|d| !d.is_empty())
    }

    /// Scheme and host with no trailing slash.
    pub fn site_base(&self) -> String {
        if let Some(base) = &self.base_url {
            return base.trim_end_matches('/').to_string();
        }
        match self.bare_domain() {
            Some(domain) => format!("{}://{}", self.protocol(), domain.trim_end_matches('/')),
            None => LOCAL_BASE.to_string(),
        }
    }

    pub fn absolute_url(&self, path: &str) -> String {
        let path = path.trim();
        if path.is_empty() {
            return String::new();
        }
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.site_base(), path.trim_start_matches('/'))
    }

    /// `(protocol, domain)` pair exposed to templates.
    pub fn protocol_and_domain(&self) -> (String, String) {
        if let Some(base) = &self.base_url {
            if let Ok(parsed) = reqwest::Url::parse(base) {
                let host = match (parsed.host_str(), parsed.port()) {
                    (Some(h), Some(p)) => format!("{h}:{p}"),
                    (Some(h), None) => h.to_string(),
                    _ => String::new(),
                };
                return (parsed.scheme().to_string(), host);
            }
        }
        let domain = self.bare_domain().unwrap_or("localhost:8000").to_string();
        (self.protocol().to_string(), domain)
    }
}

/// Merges the dispatch-wide context with everything known about one
/// recipient. Keys already present in `base` win over the derived defaults,
/// and `extras` win over both.
pub fn recipient_context(
    site: &SiteUrls,
    base: &TemplateContext,
    notification_url: &str,
    user: &UserAccount,
    player: Option<&Player>,
    extras: Option<&TemplateContext>,
) -> TemplateContext {
    let mut ctx = base.clone();

    let user_value = json!({
        "id": user.id,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "full_name": user.full_name(),
    });
    ctx.insert("user".into(), user_value.clone());
    ctx.entry("recipient").or_insert(user_value);
    ctx.entry("notification_url")
        .or_insert_with(|| Value::String(site.absolute_url(notification_url)));

    let (protocol, domain) = site.protocol_and_domain();
    ctx.entry("protocol").or_insert(Value::String(protocol));
    ctx.entry("domain").or_insert(Value::String(domain));
    ctx.entry("site_domain").or_insert_with(|| Value::String(site.site_base()));

    if let Some(p) = player {
        ctx.entry("player").or_insert_with(|| {
            json!({
                "id": p.id,
                "first_name": p.first_name,
                "last_name": p.last_name,
                "full_name": p.full_name(),
                "is_captain": p.is_captain,
            })
        });
    }

    let had_first_name = has_text(&ctx, "first_name");
    if let Some(extras) = extras {
        for (k, v) in extras {
            ctx.insert(k.clone(), v.clone());
        }
    }
    if !had_first_name && !has_text(&ctx, "first_name") {
        let first = text(&ctx, "player_first_name")
            .or_else(|| Some(user.first_name.trim()).filter(|s| !s.is_empty()).map(str::to_string))
            .unwrap_or_else(|| "Player".to_string());
        ctx.insert("first_name".into(), Value::String(first));
    }

    ctx
}

fn text(ctx: &TemplateContext, key: &str) -> Option<String> {
    ctx.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn has_text(ctx: &TemplateContext, key: &str) -> bool {
    text(ctx, key).is_some()
}
