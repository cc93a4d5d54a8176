//! Consumer domains with a fixed mail provider
//!
//! Matching one of these skips DNS entirely.

use super::MailProvider;

/// Provider for a well-known consumer domain
pub fn known_provider(domain: &str) -> Option<MailProvider> {
    let domain_lower = domain.trim().to_lowercase();

    let provider = match domain_lower.as_str() {
        "gmail.com" | "googlemail.com" | "google.com" => MailProvider::Gmail,

        "outlook.com" | "hotmail.com" | "live.com" | "msn.com" | "hotmail.co.uk"
        | "hotmail.fr" | "hotmail.de" | "outlook.co.uk" | "outlook.fr" | "outlook.de" => {
            MailProvider::Outlook
        }

        "yahoo.com" | "yahoo.co.uk" | "yahoo.fr" | "yahoo.de" | "yahoo.ca" | "yahoo.com.au"
        | "ymail.com" | "rocketmail.com" | "aol.com" => MailProvider::Yahoo,

        "icloud.com" | "me.com" | "mac.com" => MailProvider::Icloud,

        "fastmail.com" | "fastmail.fm" | "messagingengine.com" => MailProvider::Fastmail,

        "protonmail.com" | "protonmail.ch" | "pm.me" | "proton.me" => MailProvider::Protonmail,

        "zoho.com" | "zohomail.com" => MailProvider::Zoho,

        _ => return None,
    };

    Some(provider)
}

/// Provider behind an MX host, by hostname pattern
pub fn provider_from_mx(mx_host: &str) -> Option<MailProvider> {
    let mx_lower = mx_host.trim().trim_end_matches('.').to_lowercase();

    // Google Workspace
    if mx_lower.ends_with("aspmx.l.google.com")
        || mx_lower.ends_with(".google.com")
        || mx_lower.ends_with("googlemail.com")
    {
        return Some(MailProvider::Gmail);
    }

    // Microsoft 365
    if mx_lower.ends_with("mail.protection.outlook.com")
        || mx_lower.ends_with(".outlook.com")
        || mx_lower.ends_with(".microsoft.com")
    {
        return Some(MailProvider::Outlook);
    }

    if mx_lower.contains("yahoodns.net") || mx_lower.ends_with("yahoo.com") {
        return Some(MailProvider::Yahoo);
    }

    if mx_lower.ends_with("mail.icloud.com") || mx_lower.ends_with("apple.com") {
        return Some(MailProvider::Icloud);
    }

    if mx_lower.ends_with("messagingengine.com") || mx_lower.ends_with("fastmail.com") {
        return Some(MailProvider::Fastmail);
    }

    if mx_lower.ends_with("protonmail.ch") || mx_lower.ends_with("pm.me") {
        return Some(MailProvider::Protonmail);
    }

    if mx_lower.contains("zoho.com") || mx_lower.contains("zoho.eu") {
        return Some(MailProvider::Zoho);
    }

    None
}
