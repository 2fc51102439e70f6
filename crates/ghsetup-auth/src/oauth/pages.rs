use crate::provision::ProvisionReport;
use crate::secrets::SecretStorage;

const PAGE_STYLE: &str = "font-family:system-ui;text-align:center;padding:40px";

pub(crate) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"{PAGE_STYLE}\">\n<h1>{title}</h1>\n{body}\n</body></html>\n",
        title = escape_html(title),
    )
}

pub fn success_page(report: &ProvisionReport, install_url: &str) -> String {
    let creds = &report.credentials;
    let secrets_line = match &report.storage {
        SecretStorage::Stored => "Secrets added to repository.",
        SecretStorage::SavedLocally { .. } | SecretStorage::NotSaved { .. } => {
            "Secrets could not be added. Check the terminal for manual steps."
        }
    };
    page(
        "GitHub App Created",
        &format!(
            "<p><strong>{name}</strong> (ID: {id})</p>\n<p>{secrets_line}</p>\n\
             <p><a href=\"{install}\">Install the app</a></p>",
            name = escape_html(&creds.name),
            id = creds.id,
            install = escape_html(install_url),
        ),
    )
}

pub fn failure_page(error: &str) -> String {
    page(
        "Failed to create app",
        &format!(
            "<p>{}</p>\n<p>Check the terminal for details.</p>",
            escape_html(error)
        ),
    )
}

pub fn missing_code_page() -> String {
    page("Missing code", "<p>The redirect did not include a code.</p>")
}

pub fn malformed_code_page() -> String {
    page("Invalid code", "<p>The redirect carried an unexpected code.</p>")
}

pub fn state_mismatch_page() -> String {
    page(
        "State mismatch",
        "<p>This redirect does not belong to the running setup.</p>",
    )
}

pub fn completed_page() -> String {
    page(
        "Setup already finished",
        "<p>You can close this window and return to the terminal.</p>",
    )
}

/// Local page that posts the manifest to GitHub as soon as it loads.
pub fn manifest_form_page(action: &str, manifest_json: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Create GitHub App</title></head>\
         <body style=\"{PAGE_STYLE}\">\n\
         <form id=\"manifest-form\" method=\"post\" action=\"{action}\">\n\
         <input type=\"hidden\" name=\"manifest\" value=\"{manifest}\">\n\
         <noscript><button type=\"submit\">Create GitHub App</button></noscript>\n\
         </form>\n\
         <script>document.getElementById(\"manifest-form\").submit();</script>\n\
         </body></html>\n",
        action = escape_html(action),
        manifest = escape_html(manifest_json),
    )
}
