//! Organization lookup from the account endpoint.

use serde_json::Value;

/// Find the organization identifier in an account response.
///
/// Locations are tried in order and the first that yields an identifier wins:
/// 1. `memberships[0].organization` / `.workspace`
/// 2. `account.memberships[0].organization` / `.workspace`
/// 3. top-level `id`
/// 4. top-level `organization_uuid`
/// 5. `default_organization.uuid`
pub fn extract_organization_id(account: &Value) -> Option<String> {
    membership_org(account.get("memberships"))
        .or_else(|| membership_org(account.pointer("/account/memberships")))
        .or_else(|| id_value(account.get("id")))
        .or_else(|| id_value(account.get("organization_uuid")))
        .or_else(|| id_value(account.pointer("/default_organization/uuid")))
}

fn membership_org(memberships: Option<&Value>) -> Option<String> {
    let first = memberships?.as_array()?.first()?;
    ["organization", "workspace"]
        .iter()
        .filter_map(|key| first.get(*key))
        .find_map(org_id)
}

/// `uuid` or `id` of an organization/workspace object.
fn org_id(org: &Value) -> Option<String> {
    id_value(org.get("uuid")).or_else(|| id_value(org.get("id")))
}

fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_membership_organization() {
        let account = json!({"memberships": [{"organization": {"uuid": "org-1"}}]});
        assert_eq!(extract_organization_id(&account), Some("org-1".into()));
    }

    #[test]
    fn membership_workspace_with_id() {
        let account = json!({"memberships": [{"workspace": {"id": 42}}]});
        assert_eq!(extract_organization_id(&account), Some("42".into()));
    }

    #[test]
    fn nested_account_memberships() {
        let account = json!({"account": {"memberships": [{"organization": {"id": "org-2"}}]}});
        assert_eq!(extract_organization_id(&account), Some("org-2".into()));
    }

    #[test]
    fn memberships_take_priority_over_top_level_id() {
        let account = json!({
            "id": "user-id",
            "memberships": [{"organization": {"uuid": "org-3"}}]
        });
        assert_eq!(extract_organization_id(&account), Some("org-3".into()));
    }

    #[test]
    fn only_first_membership_is_considered() {
        let account = json!({
            "memberships": [{"role": "x"}, {"organization": {"uuid": "second"}}],
            "organization_uuid": "fallback"
        });
        assert_eq!(extract_organization_id(&account), Some("fallback".into()));
    }

    #[test]
    fn scalar_fallbacks_in_order() {
        assert_eq!(
            extract_organization_id(&json!({"id": "a", "organization_uuid": "b"})),
            Some("a".into())
        );
        assert_eq!(
            extract_organization_id(&json!({"organization_uuid": "b"})),
            Some("b".into())
        );
        assert_eq!(
            extract_organization_id(&json!({"default_organization": {"uuid": "c"}})),
            Some("c".into())
        );
    }

    #[test]
    fn nothing_found() {
        assert_eq!(extract_organization_id(&json!({})), None);
        assert_eq!(extract_organization_id(&json!({"memberships": []})), None);
        assert_eq!(extract_organization_id(&json!({"id": null})), None);
        assert_eq!(extract_organization_id(&json!([1, 2, 3])), None);
    }
}
