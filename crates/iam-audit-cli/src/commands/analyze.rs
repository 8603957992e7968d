use anyhow::Result;
use colored::Colorize;
use iam_audit_core::analysis::connect_client;
use iam_audit_core::report::{DynamicGroupExport, PolicyExport, write_json};
use iam_audit_core::{DynamicGroupAnalysis, DynamicGroupFilter, PolicyAnalysis, PolicyFilter};

use crate::cli::{AnalyzeArgs, OutputFormat};
use crate::commands::RunContext;
use crate::output::{print_dynamic_group_rows, print_policy_rows, print_success, print_summary};

/// Load policies and dynamic groups over one session.
pub async fn run(ctx: RunContext, args: &AnalyzeArgs) -> Result<()> {
    let (client, tenancy_id) = connect_client(&ctx.provider, &ctx.mode, &ctx.options.sink)?;
    let policies = PolicyAnalysis::new(client.clone(), tenancy_id.clone(), ctx.options.clone());
    let groups = DynamicGroupAnalysis::new(client, tenancy_id, ctx.options.clone());

    let (policy_inventory, group_inventory) =
        tokio::try_join!(policies.load_policies(), groups.load_dynamic_groups())?;

    let policy_export = policy_inventory.export(&PolicyFilter::from(&args.policy));
    let group_export = group_inventory.export(&DynamicGroupFilter::from(&args.dynamic_group));

    match ctx.settings.format {
        OutputFormat::Json => {
            let combined = serde_json::json!({
                "policy-statements": policy_export.filtered_policy_statements,
                "dynamic-groups": group_export.filtered_dynamic_groups,
            });
            println!("{}", serde_json::to_string_pretty(&combined)?);
        }
        OutputFormat::Table => {
            println!("{}", "Policy statements".cyan().bold());
            print_policy_rows(&policy_export.filtered_policy_statements, OutputFormat::Table)?;
            println!();
            println!("{}", "Dynamic groups".cyan().bold());
            print_dynamic_group_rows(&group_export.filtered_dynamic_groups, OutputFormat::Table)?;
        }
    }
    print_summary(&policy_inventory.summary);
    print_summary(&group_inventory.summary);

    if args.write_json {
        let tenancy = policies.tenancy_id();
        let dir = &ctx.settings.output_dir;
        let path = write_json(dir, &PolicyExport::file_name(tenancy), &policy_export)?;
        print_success(&format!("Wrote {}", path.display()));
        let path = write_json(dir, &DynamicGroupExport::file_name(tenancy), &group_export)?;
        print_success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}
