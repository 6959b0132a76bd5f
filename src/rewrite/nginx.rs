//! nginx snippet rendering for server level redirects

use url::Url;

use crate::models::{QueryParamPolicy, RedirectRule};
use crate::redirect::matcher::is_redirect_loop;
use crate::redirect::pattern::translate_pattern;
use crate::redirect::url::{format_target_url, split_url, untrailingslash};

/// Render every exportable rule as a `location` block.
/// Rules nginx cannot express, and rules that would redirect to themselves,
/// are left as comments.
pub fn render_server_rules(rules: &[RedirectRule], agent: &str, site: &Url) -> String {
    let mut out = format!(
        "# {} - server redirects\n# Generated automatically - DO NOT EDIT MANUALLY\n\n",
        agent
    );

    for rule in rules {
        match render_rule(rule, agent, site) {
            Ok(block) => out.push_str(&block),
            Err(reason) => out.push_str(&format!("# redirect {} skipped: {}\n", rule.id, reason)),
        }
        out.push('\n');
    }

    out
}

fn render_rule(rule: &RedirectRule, agent: &str, site: &Url) -> Result<String, &'static str> {
    if !rule.custom_rules.is_empty() {
        return Err("custom rules");
    }
    if rule.is_pass_through() {
        return Err("pass-through");
    }
    if matches!(rule.query_param, QueryParamPolicy::Exact | QueryParamPolicy::Utm) {
        return Err("query policy");
    }

    let location = location_for(rule)?;

    let action = if rule.is_redirect_type() {
        let target = format_target_url(&rule.target_url);
        if target.is_empty() {
            return Err("empty target");
        }
        if is_redirect_loop(rule, site) {
            return Err("loop");
        }
        let args = if rule.query_param == QueryParamPolicy::Pass {
            "$is_args$args"
        } else {
            ""
        };
        format!(
            "    add_header X-Redirect-By \"{}\" always;\n    return {} \"{}{}\";\n",
            agent,
            rule.redirect_type,
            escape(&target),
            args
        )
    } else {
        format!("    return {};\n", rule.redirect_type)
    };

    Ok(format!("# redirect {}\n{} {{\n{}}}\n", rule.id, location, action))
}

fn location_for(rule: &RedirectRule) -> Result<String, &'static str> {
    let modifier = if rule.ignore_case { "~*" } else { "~" };

    if rule.regex {
        let pattern = translate_pattern(&rule.source_url);
        if pattern.contains('"') {
            return Err("unsupported pattern");
        }
        return Ok(format!("location {} \"{}\"", modifier, pattern));
    }

    let (path, _) = split_url(&rule.source_url);
    if !path.starts_with('/') {
        return Err("relative source");
    }

    if !rule.ignore_slash && !rule.ignore_case {
        return Ok(format!("location = \"{}\"", escape(&path)));
    }

    let base = if rule.ignore_slash {
        untrailingslash(&path)
    } else {
        path.as_str()
    };
    let slash = if rule.ignore_slash { "/?" } else { "" };
    Ok(format!(
        "location {} \"^{}{}$\"",
        modifier,
        regex::escape(base).replace('"', "\\\""),
        slash
    ))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CustomRule;
    use crate::redirect::store::testing::{regex_rule, rule};

    fn site() -> Url {
        Url::parse("https://example.com").unwrap()
    }

    #[test]
    fn test_literal_rule() {
        let strict = RedirectRule {
            ignore_slash: false,
            ignore_case: false,
            ..rule(1, "/old", "/new")
        };
        let out = render_server_rules(&[strict], "redirect-gateway", &site());
        assert!(out.contains("location = \"/old\" {"));
        assert!(out.contains("return 301 \"/new\";"));
        assert!(out.contains("X-Redirect-By \"redirect-gateway\""));
    }

    #[test]
    fn test_relaxed_literal_rule() {
        let out = render_server_rules(&[rule(1, "/old.html/", "/new")], "rg", &site());
        assert!(out.contains("location ~* \"^/old\\.html/?$\""));
    }

    #[test]
    fn test_regex_rule_and_query_pass() {
        let r = RedirectRule {
            query_param: QueryParamPolicy::Pass,
            ignore_case: false,
            ..regex_rule(2, "^blog/(.*)", "/articles/$1")
        };
        let out = render_server_rules(&[r], "rg", &site());
        assert!(out.contains("location ~ \"^/blog/(.*)\""));
        assert!(out.contains("return 301 \"/articles/$1$is_args$args\";"));
    }

    #[test]
    fn test_status_rule() {
        let gone = RedirectRule {
            redirect_type: 410,
            ..rule(3, "/gone", "")
        };
        let out = render_server_rules(&[gone], "rg", &site());
        assert!(out.contains("return 410;"));
        assert!(!out.contains("X-Redirect-By"));
    }

    #[test]
    fn test_self_redirect_is_not_exported() {
        let looping = RedirectRule {
            ignore_slash: false,
            ignore_case: false,
            ..rule(6, "/a", "/a")
        };
        let absolute = rule(7, "/b", "https://example.com/b");
        let out = render_server_rules(&[looping, absolute], "rg", &site());
        assert!(out.contains("# redirect 6 skipped: loop"));
        assert!(out.contains("# redirect 7 skipped: loop"));
        assert!(!out.contains("return 301"));
    }

    #[test]
    fn test_unexportable_rules_are_commented() {
        let gated = RedirectRule {
            custom_rules: vec![CustomRule::Role(vec!["editor".to_string()])],
            ..rule(4, "/a", "/b")
        };
        let exact = RedirectRule {
            query_param: QueryParamPolicy::Exact,
            ..rule(5, "/c?x=1", "/d")
        };
        let out = render_server_rules(&[gated, exact], "rg", &site());
        assert!(out.contains("# redirect 4 skipped: custom rules"));
        assert!(out.contains("# redirect 5 skipped: query policy"));
        assert!(!out.contains("location"));
    }
}
