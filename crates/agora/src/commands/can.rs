//! Can command - evaluate permissions of the cached session offline.

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use serde::Serialize;

use agora_client::{Condition, ConditionContext, PermissionEvaluator};

use super::Context;
use crate::client;

/// Arguments for the can command.
#[derive(Args, Debug)]
pub struct CanArgs {
    /// Resource, e.g. forum_post
    #[arg(required_unless_present_any = ["role", "level"])]
    pub resource: Option<String>,

    /// Action, e.g. delete
    #[arg(requires = "resource")]
    pub action: Option<String>,

    /// Check a batch operation of this many items
    #[arg(long, requires = "action")]
    pub count: Option<usize>,

    /// Require the target to be owned by this user id
    #[arg(long, requires = "action", conflicts_with = "count")]
    pub owner: Option<String>,

    /// Check role membership instead of a resource permission
    #[arg(long, conflicts_with_all = ["resource", "level"])]
    pub role: Option<String>,

    /// Check the legacy minimum role level
    #[arg(long, conflicts_with = "resource")]
    pub level: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CanOutput {
    check: String,
    allowed: bool,
}

/// Run the can command.
pub async fn run(args: CanArgs, ctx: &Context) -> Result<()> {
    let client = client::build(ctx)?;
    if client.session().is_none() {
        bail!("No cached session. Run 'agora auth login' first.");
    }
    let output = evaluate(&client.permissions(), &args)?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if output.allowed {
        println!("{} {}", Style::new().green().apply_to("allowed"), output.check);
    } else {
        println!("{} {}", Style::new().red().apply_to("denied"), output.check);
    }
    Ok(())
}

fn evaluate(permissions: &PermissionEvaluator, args: &CanArgs) -> Result<CanOutput> {
    if let Some(role) = &args.role {
        return Ok(CanOutput {
            check: format!("role {}", role),
            allowed: permissions.has_role(role),
        });
    }
    if let Some(level) = args.level {
        return Ok(CanOutput {
            check: format!("level >= {}", level),
            allowed: permissions.meets_level(level),
        });
    }

    let (Some(resource), Some(action)) = (&args.resource, &args.action) else {
        bail!("Both <RESOURCE> and <ACTION> are required");
    };

    let output = match (args.count, &args.owner) {
        (Some(count), _) => CanOutput {
            check: format!("{} {} x{}", action, resource, count),
            allowed: permissions.can_batch_operate(resource, action, count),
        },
        (None, Some(owner)) => CanOutput {
            check: format!("{} {} owned by {}", action, resource, owner),
            allowed: permissions.has_resource_permission_when(
                resource,
                action,
                Some(&Condition::Owner),
                &ConditionContext::new().owner(owner.clone()),
            ),
        },
        (None, None) => CanOutput {
            check: format!("{} {}", action, resource),
            allowed: permissions.has_resource_permission(resource, action),
        },
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_client::{PermissionMatrix, Session, User};
    use std::sync::Arc;

    fn evaluator(role: &str) -> PermissionEvaluator {
        let user = User {
            id: "9".into(),
            ..Default::default()
        };
        PermissionEvaluator::new(
            Arc::new(PermissionMatrix::default()),
            Some(Session::new(user, role)),
        )
    }

    fn args(resource: &str, action: &str) -> CanArgs {
        CanArgs {
            resource: Some(resource.into()),
            action: Some(action.into()),
            count: None,
            owner: None,
            role: None,
            level: None,
        }
    }

    #[test]
    fn test_resource_checks() {
        let user = evaluator("USER");
        assert!(evaluate(&user, &args("forum_post", "create")).unwrap().allowed);
        assert!(!evaluate(&user, &args("notice", "publish")).unwrap().allowed);

        let mut batch = args("forum_post", "delete");
        batch.count = Some(11);
        assert!(!evaluate(&user, &batch).unwrap().allowed);

        let mut owned = args("forum_post", "update");
        owned.owner = Some("9".into());
        assert!(evaluate(&user, &owned).unwrap().allowed);
        owned.owner = Some("10".into());
        assert!(!evaluate(&user, &owned).unwrap().allowed);
    }

    #[test]
    fn test_role_and_level_checks() {
        let admin = evaluator("ADMIN");
        let mut role = args("", "");
        role.resource = None;
        role.action = None;
        role.role = Some("ADMIN".into());
        let output = evaluate(&admin, &role).unwrap();
        assert!(output.allowed);
        assert_eq!(output.check, "role ADMIN");

        role.role = None;
        role.level = Some(90);
        assert!(!evaluate(&admin, &role).unwrap().allowed);
    }

    #[test]
    fn test_missing_action_is_error() {
        let mut partial = args("notice", "read");
        partial.action = None;
        assert!(evaluate(&evaluator("USER"), &partial).is_err());
    }
}
