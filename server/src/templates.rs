use minijinja::{context, Environment};

const NOTIFICATION_TEMPLATE: &str = include_str!("templates/live_chat_notification.html.j2");
// The `.html` suffix turns on minijinja's HTML auto-escaping.
const NOTIFICATION_TEMPLATE_NAME: &str = "live_chat_notification.html";

pub struct NotificationContext<'a> {
    pub user_name: Option<&'a str>,
    pub user_email: &'a str,
    pub page_path: &'a str,
    pub time: &'a str,
    pub first_message: &'a str,
    pub logo_url: &'a str,
}

impl NotificationContext<'_> {
    fn name(&self) -> &str {
        match self.user_name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => "Unknown",
        }
    }
}

pub fn render_notification_html(ctx: &NotificationContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template(NOTIFICATION_TEMPLATE_NAME, NOTIFICATION_TEMPLATE)
        .is_err()
    {
        return fallback_notification_html(ctx);
    }

    let Ok(template) = env.get_template(NOTIFICATION_TEMPLATE_NAME) else {
        return fallback_notification_html(ctx);
    };

    template
        .render(context! {
            name => ctx.name(),
            email => ctx.user_email,
            page => ctx.page_path,
            time => ctx.time,
            first_message => ctx.first_message,
            logo_url => ctx.logo_url,
        })
        .unwrap_or_else(|_| fallback_notification_html(ctx))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn fallback_notification_html(ctx: &NotificationContext<'_>) -> String {
    format!(
        "<div style=\"font-family:Arial,Helvetica,sans-serif\">\
         <img src=\"{}\" alt=\"Logo\" height=\"48\">\
         <h2>New live chat request</h2>\
         <p><strong>Name:</strong> {}</p>\
         <p><strong>Email:</strong> {}</p>\
         <p><strong>Page:</strong> {}</p>\
         <p><strong>Time:</strong> {}</p>\
         <p><strong>First message:</strong></p>\
         <div style=\"white-space:pre-wrap\">{}</div>\
         </div>",
        escape_html(ctx.logo_url),
        escape_html(ctx.name()),
        escape_html(ctx.user_email),
        escape_html(ctx.page_path),
        escape_html(ctx.time),
        escape_html(ctx.first_message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(name: Option<&'a str>, first_message: &'a str) -> NotificationContext<'a> {
        NotificationContext {
            user_name: name,
            user_email: "c@d.com",
            page_path: "/services",
            time: "2026-01-01T00:00:00Z",
            first_message,
            logo_url: "https://example.com/images/logo.png",
        }
    }

    #[test]
    fn renders_all_fields_escaped() {
        let html = render_notification_html(&ctx(Some("Casey"), "<script>alert(1)</script>"));
        assert!(html.contains("Casey"));
        assert!(html.contains("c@d.com"));
        // minijinja's HTML escaping also encodes `/`.
        assert!(html.contains("services"));
        assert!(html.contains("example.com"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn missing_name_reads_unknown() {
        let html = render_notification_html(&ctx(Some("  "), "Hi"));
        assert!(html.contains("Unknown"));
    }

    #[test]
    fn fallback_escapes_too() {
        let html = fallback_notification_html(&ctx(None, "a & b"));
        assert!(html.contains("a &amp; b"));
        assert!(html.contains("Unknown"));
    }
}
