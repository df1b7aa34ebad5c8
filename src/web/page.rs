use crate::artifact::ArtifactKind;
use crate::domain::DomainName;
use crate::monitor::ExpiryStatus;
use crate::renew::RenewalState;
use crate::tool::HttpChallenge;
use crate::{CRATE_NAME, DomainOverview};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Messages shown above the domain table
#[derive(Debug, Default)]
pub struct Banners {
    pub notice: Option<String>,
    pub error: Option<String>,
    pub tool_error: Option<String>,
}

/// Instructions for a challenge the ACME client waits on
#[derive(Debug)]
pub struct PendingChallenge<'a> {
    pub domain: &'a DomainName,
    pub challenge: &'a HttpChallenge,
}

fn format_time(time: Option<OffsetDateTime>) -> String {
    time.and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "never".to_string())
}

fn status_class(status: ExpiryStatus) -> &'static str {
    match status {
        ExpiryStatus::Unknown => "unknown",
        ExpiryStatus::Expired | ExpiryStatus::Critical => "bad",
        ExpiryStatus::Warning => "warn",
        ExpiryStatus::Ok => "good",
    }
}

fn button(out: &mut String, action: &str, label: &str) {
    let _ = write!(
        out,
        r#"<form method="post" action="{}"><button type="submit">{}</button></form>"#,
        encode_double_quoted_attribute(action),
        encode_text(label)
    );
}

pub fn render_index(
    domains: &[DomainOverview],
    banners: &Banners,
    pending: Option<PendingChallenge<'_>>,
) -> String {
    let mut out = String::with_capacity(4096);
    let _ = write!(
        out,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{CRATE_NAME}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ border: 1px solid #ccc; padding: 0.4em; text-align: left; vertical-align: top; }}
td form {{ display: inline; }}
.good {{ color: #1a7f37; }} .warn {{ color: #9a6700; }} .bad {{ color: #cf222e; font-weight: bold; }}
.banner {{ padding: 0.6em; margin-bottom: 1em; border: 1px solid; }}
.banner.error {{ border-color: #cf222e; }} .banner.notice {{ border-color: #1a7f37; }}
pre {{ background: #f6f8fa; padding: 0.6em; white-space: pre-wrap; }}
</style>
</head>
<body>
<h1>{CRATE_NAME}</h1>
"#
    );
    if let Some(notice) = &banners.notice {
        let _ = writeln!(out, r#"<div class="banner notice">{}</div>"#, encode_text(notice));
    }
    if let Some(error) = &banners.error {
        let _ = writeln!(out, r#"<div class="banner error">{}</div>"#, encode_text(error));
    }
    if let Some(tool_error) = &banners.tool_error {
        let _ = writeln!(
            out,
            r#"<div class="banner error">The ACME client reported an error:<pre>{}</pre></div>"#,
            encode_text(tool_error)
        );
    }
    if let Some(pending) = pending {
        render_challenge(&mut out, &pending);
    }

    out.push_str(
        r#"<form method="post" action="/domains/add">
<input name="domain" placeholder="example.com" required>
<input name="notes" placeholder="notes">
<button type="submit">Add domain</button>
</form>
"#,
    );
    button(&mut out, "/domains/refresh-all", "Refresh all");

    out.push_str(
        "<table>\n<tr><th>Domain</th><th>Expires</th><th>Days left</th><th>Status</th>\
         <th>Issuer</th><th>Last checked</th><th>Last error</th><th>Downloads</th><th>Actions</th></tr>\n",
    );
    if domains.is_empty() {
        out.push_str(r#"<tr><td colspan="9">No domains tracked yet.</td></tr>"#);
    }
    for domain in domains {
        render_row(&mut out, domain);
    }
    out.push_str("</table>\n</body>\n</html>\n");
    out
}

fn render_challenge(out: &mut String, pending: &PendingChallenge<'_>) {
    let domain = pending.domain;
    let challenge = pending.challenge;
    let _ = write!(
        out,
        r#"<div class="banner notice">
<h2>Challenge for {domain}</h2>
<p>Create a file named <code>{file_name}</code> containing exactly:</p>
<pre>{content}</pre>
<p>and make it available at <code>http://{domain}{path}</code>. Then confirm:</p>
"#,
        domain = encode_text(domain.as_str()),
        file_name = encode_text(&challenge.file_name),
        content = encode_text(&challenge.file_content),
        path = encode_text(&challenge.path()),
    );
    button(out, &format!("/domains/{domain}/renew/complete"), "The file is in place");
    button(out, &format!("/domains/{domain}/renew/cancel"), "Cancel renewal");
    out.push_str("</div>\n");
}

fn render_row(out: &mut String, domain: &DomainOverview) {
    let record = &domain.record;
    let name = record.name.as_str();
    let days = domain
        .days_until_expiry
        .map_or_else(|| "-".to_string(), |days| days.to_string());
    let _ = write!(
        out,
        r#"<tr><td>{name}{notes}</td><td>{expires}</td><td>{days}</td><td class="{class}">{status}</td><td>{issuer}</td><td>{checked}</td><td>{error}</td><td>"#,
        name = encode_text(name),
        notes = record
            .notes
            .as_deref()
            .map(|notes| format!("<br><small>{}</small>", encode_text(notes)))
            .unwrap_or_default(),
        expires = format_time(record.expires_at),
        class = status_class(domain.status),
        status = domain.status,
        issuer = encode_text(record.issuer.as_deref().unwrap_or("-")),
        checked = format_time(record.last_checked_at),
        error = encode_text(record.last_error.as_deref().unwrap_or("")),
    );
    for kind in &domain.artifacts {
        let _ = write!(
            out,
            r#"<a href="/api/domains/{}/download/{kind}" title="{}">{}</a> "#,
            encode_double_quoted_attribute(name),
            encode_double_quoted_attribute(&kind.download_name(&record.name)),
            artifact_label(*kind),
        );
    }
    out.push_str("</td><td>");
    match &domain.renewal {
        RenewalState::ChallengeIssued { .. } => {
            let _ = write!(
                out,
                r#"<a href="/?challenge={}">Show challenge</a> "#,
                encode_double_quoted_attribute(name)
            );
        }
        RenewalState::Failed { reason, .. } => {
            let _ = write!(
                out,
                r#"<small title="{}">last renewal failed</small> "#,
                encode_double_quoted_attribute(reason)
            );
            button(out, &format!("/domains/{name}/renew"), "Renew");
        }
        RenewalState::Idle | RenewalState::Completed { .. } => {
            button(out, &format!("/domains/{name}/renew"), "Renew");
        }
    }
    button(out, &format!("/domains/{name}/refresh"), "Refresh");
    button(out, &format!("/domains/{name}/delete"), "Remove");
    out.push_str("</td></tr>\n");
}

fn artifact_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Cert => "Certificate",
        ArtifactKind::Fullchain => "Full chain",
        ArtifactKind::CaBundle => "CA bundle",
        ArtifactKind::Key => "Private key",
    }
}
