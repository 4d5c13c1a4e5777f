//! Built-in fallback pages.
//!
//! Minimal, dependency-free HTML for deployments that have not configured
//! their own pages. Every page can be replaced via
//! [`PagesOptions`](crate::config::PagesOptions), in which case the engine
//! redirects instead of rendering.

use http::StatusCode;

use crate::config::AuthConfig;
use crate::providers::Provider;
use crate::request::RequestInternal;
use crate::response::ResponseInternal;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n</head>\n<body>\n{body}\n</body>\n</html>"
    )
}

/// `GET {basePath}/error?error=<kind>`: a human-readable rendering of the
/// stable error code. Unknown codes get the generic message.
pub(crate) fn error_page(request: &RequestInternal, config: &AuthConfig) -> ResponseInternal {
    let kind = request.query_param("error").unwrap_or("Default");
    let message = match kind {
        "AccessDenied" => "You do not have permission to sign in.",
        "Verification" => "The sign-in link is no longer valid. It may have been used already or it may have expired.",
        "AccountNotLinked" => "This e-mail is already associated with another sign-in method.",
        "Configuration" => "There is a problem with the server configuration.",
        _ => "An error occurred while trying to sign you in.",
    };
    let signin = config.api_url("signin");
    let body = format!(
        "<h1>Sign-in error</h1>\n<p>{}</p>\n<p><a href=\"{}\">Try again</a></p>",
        escape(message),
        escape(&signin)
    );
    ResponseInternal::html(StatusCode::OK, page("Sign-in error", &body))
}

/// `GET {basePath}/verify-request`: shown after an email sign-in request.
pub(crate) fn verify_request_page(config: &AuthConfig) -> ResponseInternal {
    let origin = config.origin();
    let body = format!(
        "<h1>Check your email</h1>\n\
         <p>A sign-in link has been sent to your email address.</p>\n\
         <p><a href=\"{}\">{}</a></p>",
        escape(&origin),
        escape(&origin)
    );
    ResponseInternal::html(StatusCode::OK, page("Check your email", &body))
}

/// `GET {basePath}/signin`: one form per configured provider, each carrying
/// the CSRF token for the POST that starts the flow.
pub(crate) fn signin_page(config: &AuthConfig, csrf_token: &str) -> ResponseInternal {
    let mut forms = String::new();
    for provider in &config.providers {
        let action = config.api_url(&format!("signin/{}", provider.id()));
        let extra = match provider {
            Provider::Email(_) => {
                "<input type=\"email\" name=\"email\" placeholder=\"email@example.com\" required>\n"
            }
            _ => "",
        };
        forms.push_str(&format!(
            "<form action=\"{}\" method=\"POST\">\n\
             <input type=\"hidden\" name=\"csrfToken\" value=\"{}\">\n\
             {extra}<button type=\"submit\">Sign in with {}</button>\n</form>\n",
            escape(&action),
            escape(csrf_token),
            escape(provider.name())
        ));
    }
    ResponseInternal::html(StatusCode::OK, page("Sign in", &forms))
}

/// `GET {basePath}/signout`: confirmation form so sign-out itself goes
/// through a CSRF-protected POST.
pub(crate) fn signout_page(config: &AuthConfig, csrf_token: &str) -> ResponseInternal {
    let action = config.api_url("signout");
    let body = format!(
        "<h1>Sign out</h1>\n<p>Are you sure you want to sign out?</p>\n\
         <form action=\"{}\" method=\"POST\">\n\
         <input type=\"hidden\" name=\"csrfToken\" value=\"{}\">\n\
         <button type=\"submit\">Sign out</button>\n</form>",
        escape(&action),
        escape(csrf_token)
    );
    ResponseInternal::html(StatusCode::OK, page("Sign out", &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Body;
    use crate::test_utils::{test_config, test_request_with_cookies};

    fn html_of(response: ResponseInternal) -> String {
        match response.body {
            Some(Body::Html(markup)) => markup,
            other => panic!("Expected HTML body, got {other:?}"),
        }
    }

    #[test]
    fn test_error_page_escapes_and_explains() {
        let config = test_config();
        let request =
            test_request_with_cookies("/api/auth/error?error=AccessDenied", &[]);
        let markup = html_of(error_page(&request, &config));
        assert!(markup.contains("permission to sign in"));

        let request = test_request_with_cookies(
            "/api/auth/error?error=%3Cscript%3Ealert(1)%3C%2Fscript%3E",
            &[],
        );
        let markup = html_of(error_page(&request, &config));
        assert!(!markup.contains("<script>"));
        assert!(markup.contains("An error occurred"));
    }

    #[test]
    fn test_signin_page_lists_providers_with_csrf() {
        let config = test_config();
        let markup = html_of(signin_page(&config, "csrf-value"));
        assert!(markup.contains("/api/auth/signin/acme"));
        assert!(markup.contains("name=\"csrfToken\" value=\"csrf-value\""));
    }
}
