//! URL Rewriter (C5): `/meta/{user_id}/{provider}/{rest...}` →
//! `/{provider}/{rest...}`, binding `user_id` into the request context.

use super::registry::ProviderRegistry;

/// Result of attempting a meta-path rewrite.
pub struct Rewritten {
    pub path: String,
    pub user_id: Option<String>,
}

/// Rewrite `path` against the known provider set. Per spec §4.5:
/// - only rewrite when segment count is >= 4 and segment 3 is a known
///   provider name (segments: ["", "meta", user, provider, ...rest]);
/// - empty user_id is permitted, still rewrites;
/// - unknown provider leaves the path untouched;
/// - `/{provider}` with no trailing elements normalizes to `/{provider}/`.
pub fn rewrite(path: &str, registry: &ProviderRegistry) -> Rewritten {
    let segments: Vec<&str> = path.split('/').collect();

    // split("/meta/u/openai/x") -> ["", "meta", "u", "openai", "x"]
    if segments.len() < 4 || segments.get(1) != Some(&"meta") {
        return Rewritten {
            path: path.to_string(),
            user_id: None,
        };
    }

    let user_id = segments[2];
    let provider = segments[3];

    if !registry.is_known(provider) {
        return Rewritten {
            path: path.to_string(),
            user_id: None,
        };
    }

    let rest = &segments[4..];
    let rewritten = if rest.is_empty() {
        format!("/{provider}/")
    } else {
        format!("/{provider}/{}", rest.join("/"))
    };

    Rewritten {
        path: rewritten,
        user_id: if user_id.is_empty() {
            None
        } else {
            Some(user_id.to_string())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::providers::{anthropic::AnthropicHandler, openai::OpenAiHandler};
    use std::sync::Arc;

    fn registry() -> ProviderRegistry {
        let mut r = ProviderRegistry::new();
        r.register(Arc::new(OpenAiHandler::new(
            "https://api.openai.com".into(),
        )));
        r.register(Arc::new(AnthropicHandler::new(
            "https://api.anthropic.com".into(),
        )));
        r
    }

    #[test]
    fn happy_path_rewrite() {
        let r = registry();
        let result = rewrite("/meta/test-user-456/openai/v1/chat/completions", &r);
        assert_eq!(result.path, "/openai/v1/chat/completions");
        assert_eq!(result.user_id.as_deref(), Some("test-user-456"));
    }

    #[test]
    fn empty_user_id_still_rewrites() {
        let r = registry();
        let result = rewrite("/meta//openai/v1/chat/completions", &r);
        assert_eq!(result.path, "/openai/v1/chat/completions");
        assert_eq!(result.user_id, None);
    }

    #[test]
    fn unknown_provider_passes_through_unchanged() {
        let r = registry();
        let original = "/meta/user/unknownprovider/v1/x";
        let result = rewrite(original, &r);
        assert_eq!(result.path, original);
        assert_eq!(result.user_id, None);
    }

    #[test]
    fn bare_provider_path_normalizes_with_trailing_slash() {
        let r = registry();
        let result = rewrite("/meta/user/openai", &r);
        assert_eq!(result.path, "/openai/");
    }

    #[test]
    fn non_meta_path_is_untouched() {
        let r = registry();
        let result = rewrite("/health", &r);
        assert_eq!(result.path, "/health");
        assert_eq!(result.user_id, None);
    }

    #[test]
    fn rewriting_twice_is_a_no_op() {
        let r = registry();
        let once = rewrite("/meta/test-user/openai/v1/chat/completions", &r);
        let twice = rewrite(&once.path, &r);
        assert_eq!(twice.path, once.path);
    }
}
