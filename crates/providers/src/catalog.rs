//! Built-in provider catalog.
//!
//! Operation ids here must stay in lock-step with the spec documents bundled
//! in `relay-specs`: permission discovery maps spec scopes onto these ids.

use crate::types::{AuthRule, IntrospectionRule, OperationMapping, ProviderDef};

fn op(
    operation_id: &str,
    http_method: &str,
    path_template: &str,
    required: &[&str],
    optional: &[&str],
    scopes: &[&str],
    description: &str,
) -> OperationMapping {
    OperationMapping {
        operation_id: operation_id.into(),
        http_method: http_method.into(),
        path_template: path_template.into(),
        required_params: required.iter().map(|s| (*s).into()).collect(),
        optional_params: optional.iter().map(|s| (*s).into()).collect(),
        required_scopes: scopes.iter().map(|s| (*s).into()).collect(),
        description: description.into(),
    }
}

fn github() -> ProviderDef {
    ProviderDef {
        name: "github".into(),
        base_url: "https://api.github.com".into(),
        spec_url:
            "https://raw.githubusercontent.com/github/rest-api-description/main/descriptions/api.github.com/api.github.com.json"
                .into(),
        auth: AuthRule::Token,
        introspection: IntrospectionRule::ScopesHeader {
            path: "/user".into(),
            header: "x-oauth-scopes".into(),
        },
        operations: vec![
            op(
                "repos/get",
                "GET",
                "/repos/{owner}/{repo}",
                &["owner", "repo"],
                &[],
                &["repo:read"],
                "Get a repository",
            ),
            op(
                "repos/list-for-org",
                "GET",
                "/orgs/{org}/repos",
                &["org"],
                &["type", "per_page", "page"],
                &["repo:read"],
                "List organization repositories",
            ),
            op(
                "issues/list",
                "GET",
                "/repos/{owner}/{repo}/issues",
                &["owner", "repo"],
                &["state", "labels"],
                &["repo:read"],
                "List repository issues",
            ),
            op(
                "issues/create",
                "POST",
                "/repos/{owner}/{repo}/issues",
                &["owner", "repo", "title"],
                &["body"],
                &["repo:write"],
                "Create an issue",
            ),
            op(
                "issues/create-comment",
                "POST",
                "/repos/{owner}/{repo}/issues/{issue_number}/comments",
                &["owner", "repo", "issue_number", "body"],
                &[],
                &["repo:write"],
                "Create an issue comment",
            ),
            op(
                "pulls/list",
                "GET",
                "/repos/{owner}/{repo}/pulls",
                &["owner", "repo"],
                &["state"],
                &["repo:read"],
                "List pull requests",
            ),
            op(
                "pulls/create",
                "POST",
                "/repos/{owner}/{repo}/pulls",
                &["owner", "repo", "title", "head", "base"],
                &[],
                &["repo:write"],
                "Create a pull request",
            ),
        ],
    }
}

fn gitlab() -> ProviderDef {
    ProviderDef {
        name: "gitlab".into(),
        base_url: "https://gitlab.com/api/v4".into(),
        spec_url: "https://gitlab.com/api/v4/openapi.json".into(),
        auth: AuthRule::Header {
            name: "PRIVATE-TOKEN".into(),
        },
        introspection: IntrospectionRule::ScopesField {
            path: "/personal_access_tokens/self".into(),
            field: "scopes".into(),
        },
        operations: vec![
            op(
                "projects/get",
                "GET",
                "/projects/{id}",
                &["id"],
                &[],
                &["read_api"],
                "Get a single project",
            ),
            op(
                "projects/list",
                "GET",
                "/projects",
                &[],
                &["membership", "per_page"],
                &["read_api"],
                "List projects",
            ),
            op(
                "merge_requests/list",
                "GET",
                "/projects/{id}/merge_requests",
                &["id"],
                &["state"],
                &["read_api"],
                "List project merge requests",
            ),
            op(
                "merge_requests/create",
                "POST",
                "/projects/{id}/merge_requests",
                &["id", "source_branch", "target_branch", "title"],
                &[],
                &["api"],
                "Create a merge request",
            ),
            op(
                "issues/create",
                "POST",
                "/projects/{id}/issues",
                &["id", "title"],
                &["description"],
                &["api"],
                "Create an issue",
            ),
        ],
    }
}

fn jira() -> ProviderDef {
    ProviderDef {
        name: "jira".into(),
        base_url: "https://api.atlassian.com/ex/jira".into(),
        spec_url: "https://developer.atlassian.com/cloud/jira/platform/swagger-v3.v3.json".into(),
        auth: AuthRule::Basic,
        introspection: IntrospectionRule::Static {
            scopes: vec!["read:jira-work".into(), "write:jira-work".into()],
        },
        operations: vec![
            op(
                "issues/get",
                "GET",
                "/rest/api/3/issue/{issueIdOrKey}",
                &["issueIdOrKey"],
                &[],
                &["read:jira-work"],
                "Get an issue",
            ),
            op(
                "issues/search",
                "GET",
                "/rest/api/3/search",
                &["jql"],
                &["maxResults"],
                &["read:jira-work"],
                "Search issues with JQL",
            ),
            op(
                "issues/create",
                "POST",
                "/rest/api/3/issue",
                &["project", "summary", "issuetype"],
                &[],
                &["write:jira-work"],
                "Create an issue",
            ),
            op(
                "issues/add-comment",
                "POST",
                "/rest/api/3/issue/{issueIdOrKey}/comment",
                &["issueIdOrKey", "body"],
                &[],
                &["write:jira-work"],
                "Add a comment",
            ),
        ],
    }
}

/// All providers this build ships with.
#[must_use]
pub fn builtin_providers() -> Vec<ProviderDef> {
    vec![github(), gitlab(), jira()]
}
