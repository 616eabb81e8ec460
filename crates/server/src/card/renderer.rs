use std::collections::BTreeMap;

use chatops_core::{
    ActionKind, BATCH_SERVICE, ButtonAction, CardState, ReleaseRequest, RequestId, ServiceSpec,
    composite_key,
};
use tracing::error;

use crate::feishu::types::{
    ActionElement, Button, ButtonType, ButtonValue, Card, CardElement, CardHeader, Confirm,
    HeaderTemplate, Text,
};

const NO_BRANCH: &str = "无分支";
const SERVICE_CONFIRM: &str = "是否确认？";

/// Render the card for a stored state, applying the display view.
#[must_use]
pub fn render_state(state: &CardState, request_id: &RequestId) -> Option<Card> {
    build_card(
        &state.original_request.display_view(),
        request_id,
        &state.disabled_actions,
        &state.action_counts,
    )
}

/// Build the interactive card for a release request.
///
/// `disabled` and `counts` are keyed by `"{service}:{action}"`. Returns
/// `None` when the first service is missing its object id, actions or
/// branches, or when there are no services at all. Later services without a
/// branch render a placeholder instead.
#[must_use]
pub fn build_card(
    request: &ReleaseRequest,
    request_id: &RequestId,
    disabled: &BTreeMap<String, bool>,
    counts: &BTreeMap<String, u32>,
) -> Option<Card> {
    let Some(first) = request.services.first() else {
        error!(request_id = %request_id, "Cannot render card: services list is empty");
        return None;
    };
    if first.object_id.is_empty() {
        error!(request_id = %request_id, "Cannot render card: object id is empty");
        return None;
    }
    if first.actions.is_empty() {
        error!(request_id = %request_id, "Cannot render card: actions list is empty");
        return None;
    }
    if first.branches.is_empty() {
        error!(request_id = %request_id, "Cannot render card: branches list is empty");
        return None;
    }

    let lookup = ButtonState { disabled, counts };

    let mut elements = vec![
        CardElement::markdown(""),
        CardElement::Hr,
        CardElement::markdown("📋 **服务列表与操作**"),
    ];

    for (i, service) in request.services.iter().enumerate() {
        if i > 0 {
            elements.push(CardElement::Hr);
        }

        let branch = service.primary_branch().unwrap_or_else(|| {
            error!(service = %service.name, "Service has no branches");
            NO_BRANCH
        });

        elements.push(CardElement::markdown(format!(
            "**{}. 服务名称：** `{}`",
            i + 1,
            service.name
        )));
        elements.push(CardElement::markdown(format!(
            "📦 **发布分支：** `{branch}`"
        )));

        let actions = offered_actions(service)
            .into_iter()
            .map(|kind| {
                ActionElement::Button(service_button(
                    &kind,
                    &service.name,
                    branch,
                    request_id,
                    &lookup,
                ))
            })
            .collect();
        elements.push(CardElement::Action { actions });
    }

    elements.push(CardElement::Hr);
    elements.push(CardElement::markdown("⚡ **批量操作**"));

    let all_branches: BTreeMap<String, String> = request
        .services
        .iter()
        .filter_map(|s| {
            s.primary_branch()
                .map(|branch| (s.name.clone(), branch.to_string()))
        })
        .collect();

    let batch = [
        (ButtonAction::BatchReleaseAll, "批量发布", "🚀", ButtonType::Primary),
        (ButtonAction::StopBatchRelease, "结束批量发布", "⏹️", ButtonType::Danger),
    ]
    .into_iter()
    .map(|(action, label, icon, style)| {
        ActionElement::Button(batch_button(
            &action,
            label,
            icon,
            style,
            request_id,
            &all_branches,
            &lookup,
        ))
    })
    .collect();
    elements.push(CardElement::Action { actions: batch });

    Some(Card {
        header: CardHeader {
            title: Text::plain(format!("🚀{}-服务发布通知", first.object_id)),
            template: HeaderTemplate::Blue,
        },
        elements,
    })
}

struct ButtonState<'a> {
    disabled: &'a BTreeMap<String, bool>,
    counts: &'a BTreeMap<String, u32>,
}

impl ButtonState<'_> {
    fn is_disabled(&self, service: &str, action: &ButtonAction) -> bool {
        self.disabled
            .get(&composite_key(service, action.as_str()))
            .copied()
            .unwrap_or(false)
    }

    fn count(&self, service: &str, action: &ButtonAction) -> u32 {
        self.counts
            .get(&composite_key(service, action.as_str()))
            .copied()
            .unwrap_or(0)
    }
}

/// Declared actions minus `check`, with rollback and restart always present.
fn offered_actions(service: &ServiceSpec) -> Vec<ActionKind> {
    let mut kinds: Vec<ActionKind> = service
        .action_kinds()
        .filter(|kind| *kind != ActionKind::Check)
        .collect();

    if !kinds.contains(&ActionKind::Rollback) {
        kinds.push(ActionKind::Rollback);
    }
    if !kinds.contains(&ActionKind::Restart) {
        kinds.push(ActionKind::Restart);
    }

    kinds
}

fn service_button(
    kind: &ActionKind,
    service: &str,
    branch: &str,
    request_id: &RequestId,
    state: &ButtonState<'_>,
) -> Button {
    let (label, style) = match kind {
        ActionKind::Gray => ("🚀 灰度".to_string(), ButtonType::Primary),
        ActionKind::Official => ("🎉 正式".to_string(), ButtonType::Danger),
        ActionKind::Rollback => ("🔙 回滚".to_string(), ButtonType::Danger),
        ActionKind::Restart => ("🔄 重启".to_string(), ButtonType::Primary),
        ActionKind::Check => ("check".to_string(), ButtonType::Primary),
        ActionKind::Other(tag) => (tag.clone(), ButtonType::Primary),
    };
    let action = kind.button_action();
    let disabled = state.is_disabled(service, &action);
    let count = state.count(service, &action);

    Button {
        text: Text::plain(with_count(label, count)),
        button_type: if disabled { ButtonType::Default } else { style },
        disabled,
        value: ButtonValue {
            action: action.as_str().to_string(),
            service: service.to_string(),
            request_id: request_id.to_string(),
            branch: Some(branch.to_string()),
            all_branches: None,
        },
        confirm: Confirm::new(SERVICE_CONFIRM),
    }
}

fn batch_button(
    action: &ButtonAction,
    label: &str,
    icon: &str,
    style: ButtonType,
    request_id: &RequestId,
    all_branches: &BTreeMap<String, String>,
    state: &ButtonState<'_>,
) -> Button {
    let disabled = state.is_disabled(BATCH_SERVICE, action);
    let text = if disabled {
        format!("{icon} {label} (已执行)")
    } else {
        with_count(format!("{icon} {label}"), state.count(BATCH_SERVICE, action))
    };

    Button {
        text: Text::plain(text),
        button_type: if disabled { ButtonType::Default } else { style },
        disabled,
        value: ButtonValue {
            action: action.as_str().to_string(),
            service: BATCH_SERVICE.to_string(),
            request_id: request_id.to_string(),
            branch: None,
            all_branches: Some(all_branches.clone()),
        },
        confirm: Confirm::new(format!("是否确认{label}所有服务？")),
    }
}

fn with_count(label: String, count: u32) -> String {
    if count > 0 {
        format!("{label} ({count})")
    } else {
        label
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn service(name: &str, branches: &[&str], actions: &[&str]) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            object_id: name.to_string(),
            branches: branches.iter().map(ToString::to_string).collect(),
            actions: actions.iter().map(ToString::to_string).collect(),
        }
    }

    fn request(services: Vec<ServiceSpec>) -> ReleaseRequest {
        ReleaseRequest {
            title: String::new(),
            services,
            object_id: String::new(),
            receive_id: "oc_1".to_string(),
            receive_id_type: "chat_id".to_string(),
        }
    }

    fn render(request: &ReleaseRequest) -> Option<Card> {
        build_card(
            request,
            &RequestId::new("req_1"),
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
    }

    fn actions_for<'a>(card: &'a Card, service: &str) -> Vec<&'a str> {
        card.buttons()
            .filter(|b| b.value.service == service)
            .map(|b| b.value.action.as_str())
            .collect()
    }

    #[test]
    fn test_preconditions_on_first_service() {
        assert!(render(&request(vec![])).is_none());
        assert!(render(&request(vec![service("a", &["m"], &[])])).is_none());
        assert!(render(&request(vec![service("a", &[], &["gray"])])).is_none());

        let mut no_object = service("a", &["m"], &["gray"]);
        no_object.object_id.clear();
        assert!(render(&request(vec![no_object])).is_none());
    }

    #[test]
    fn test_title_and_layout() {
        let card = render(&request(vec![
            service("api", &["master"], &["gray"]),
            service("web", &["dev"], &["official"]),
        ]))
        .unwrap();

        assert_eq!(card.header.title.content(), "🚀api-服务发布通知");

        let json = serde_json::to_value(&card).unwrap();
        let tags: Vec<&str> = json["elements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["tag"].as_str().unwrap())
            .collect();
        assert_eq!(
            tags,
            [
                "div", "hr", "div", // header block
                "div", "div", "action", "hr", // api
                "div", "div", "action", // web
                "hr", "div", "action", // batch
            ]
        );
        assert_eq!(json["header"]["template"], "blue");
    }

    #[test]
    fn test_check_is_hidden_and_rollback_restart_forced() {
        let card = render(&request(vec![service("svc", &["master"], &["gray", "check"])])).unwrap();

        assert_eq!(
            actions_for(&card, "svc"),
            ["do_gray_release", "do_rollback", "do_restart"]
        );
    }

    #[test]
    fn test_synonyms_are_not_duplicated() {
        let card = render(&request(vec![service(
            "svc",
            &["master"],
            &["重启", "正式", "回滚", "migrate"],
        )]))
        .unwrap();

        assert_eq!(
            actions_for(&card, "svc"),
            [
                "do_restart",
                "do_official_release",
                "do_rollback",
                "do_migrate"
            ]
        );
        let custom = card.button("svc", "do_migrate").unwrap();
        assert_eq!(custom.text.content(), "migrate");
        assert_eq!(custom.button_type, ButtonType::Primary);
    }

    #[test]
    fn test_disabled_and_counted_buttons() {
        let req = request(vec![service("svc", &["master"], &["official"])]);
        let disabled = BTreeMap::from([
            ("svc:do_rollback".to_string(), true),
            ("BATCH:stop_batch_release".to_string(), true),
        ]);
        let counts = BTreeMap::from([
            ("svc:do_official_release".to_string(), 2),
            ("svc:do_rollback".to_string(), 1),
        ]);

        let card = build_card(&req, &RequestId::new("r"), &disabled, &counts).unwrap();

        let official = card.button("svc", "do_official_release").unwrap();
        assert_eq!(official.text.content(), "🎉 正式 (2)");
        assert_eq!(official.button_type, ButtonType::Danger);
        assert!(!official.disabled);

        let rollback = card.button("svc", "do_rollback").unwrap();
        assert_eq!(rollback.text.content(), "🔙 回滚 (1)");
        assert_eq!(rollback.button_type, ButtonType::Default);
        assert!(rollback.disabled);

        let stop = card.button(BATCH_SERVICE, "stop_batch_release").unwrap();
        assert_eq!(stop.text.content(), "⏹️ 结束批量发布 (已执行)");
        assert!(stop.disabled);
    }

    #[test]
    fn test_button_values() {
        let card = render(&request(vec![
            service("api", &["master", "dev"], &["gray"]),
            service("web", &[], &["gray"]),
        ]))
        .unwrap();

        let gray = card.button("web", "do_gray_release").unwrap();
        assert_eq!(gray.value.branch.as_deref(), Some(NO_BRANCH));
        assert_eq!(gray.value.request_id, "req_1");
        assert_eq!(gray.confirm.title.content(), SERVICE_CONFIRM);

        let batch = card.button(BATCH_SERVICE, "batch_release_all").unwrap();
        assert_eq!(
            batch.value.all_branches,
            Some(BTreeMap::from([("api".to_string(), "master".to_string())]))
        );
        assert_eq!(batch.confirm.title.content(), "是否确认批量发布所有服务？");
        assert_eq!(batch.text.content(), "🚀 批量发布");
    }

    #[test]
    fn test_render_state_uses_display_view() {
        let state = CardState::new(request(vec![
            service("api", &["master"], &["gray", "official"]),
            service("web", &["master"], &["official"]),
        ]));

        let card = render_state(&state, &RequestId::new("r")).unwrap();

        assert!(card.button("api", "do_gray_release").is_some());
        assert!(card.buttons().all(|b| b.value.action != "do_official_release"));
        assert!(card.buttons().all(|b| b.value.service != "web"));
    }
}
