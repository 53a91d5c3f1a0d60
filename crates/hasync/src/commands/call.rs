//! Service call handlers.

use serde_json::{Value, json};

use hasync_core::Controller;

use crate::cli::{CallArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

fn parse_data(raw: Option<&str>) -> Result<Option<Value>, CliError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(CliError::Validation {
            field: "--data".into(),
            reason: "expected a JSON object".into(),
        });
    }
    Ok(Some(value))
}

fn target(entities: &[String]) -> Option<Value> {
    match entities {
        [] => None,
        [one] => Some(json!({ "entity_id": one })),
        many => Some(json!({ "entity_id": many })),
    }
}

pub async fn handle(
    controller: &Controller,
    args: CallArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::require_online(global, "call")?;
    let data = parse_data(args.data.as_deref())?;
    super::sync(controller, global).await?;

    let result = controller
        .call_service(&args.domain, &args.service, data, target(&args.entity))
        .await?;
    tracing::info!(domain = %args.domain, service = %args.service, "service called");

    let out = output::render_single(
        &global.output,
        &result,
        |_| format!("Called {}.{}", args.domain, args.service),
        |r| r["context"]["id"].as_str().unwrap_or_default().to_owned(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

/// `on`, `off`, and `toggle`.
pub async fn handle_entity(
    controller: &Controller,
    service: &str,
    entity_id: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::require_online(global, service)?;
    super::sync(controller, global).await?;

    // Unknown ids fail here rather than as an opaque server error.
    controller.entity(entity_id)?;
    match service {
        "turn_on" => controller.turn_on(entity_id).await?,
        "turn_off" => controller.turn_off(entity_id).await?,
        _ => controller.toggle(entity_id).await?,
    };

    if !global.quiet {
        eprintln!("{entity_id}: {service}");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn single_target_is_a_plain_id() {
        assert_eq!(target(&["light.a".into()]), Some(json!({ "entity_id": "light.a" })));
        assert_eq!(
            target(&["light.a".into(), "light.b".into()]),
            Some(json!({ "entity_id": ["light.a", "light.b"] }))
        );
        assert_eq!(target(&[]), None);
    }

    #[test]
    fn data_must_be_an_object() {
        assert!(parse_data(Some(r#"{"brightness": 10}"#)).unwrap().is_some());
        assert!(matches!(parse_data(Some("[1]")), Err(CliError::Validation { .. })));
        assert!(matches!(parse_data(Some("{")), Err(CliError::Json(_))));
    }
}
