use anyhow::Result;
use iam_audit_core::report::{PolicyExport, write_json};
use iam_audit_core::{PolicyAnalysis, PolicyFilter};

use crate::cli::{PolicyArgs, PolicyFilterArgs};
use crate::commands::RunContext;
use crate::output::{print_policy_rows, print_success, print_summary};

impl From<&PolicyFilterArgs> for PolicyFilter {
    fn from(args: &PolicyFilterArgs) -> Self {
        Self {
            subject: args.subject.clone(),
            verb: args.verb.clone(),
            resource: args.resource.clone(),
            location: args.location.clone(),
            hierarchy: args.hierarchy.clone(),
            condition: args.condition.clone(),
            text: args.text.clone(),
            policy_name: args.policy_name.clone(),
        }
    }
}

pub async fn run(ctx: RunContext, args: &PolicyArgs) -> Result<()> {
    let analysis = PolicyAnalysis::connect(&ctx.provider, &ctx.mode, ctx.options.clone())?;
    let inventory = analysis.load_policies().await?;

    let filter = PolicyFilter::from(&args.filter);
    let export = inventory.export(&filter);
    print_policy_rows(&export.filtered_policy_statements, ctx.settings.format)?;
    print_summary(&inventory.summary);

    if args.write_json {
        let path = write_json(
            &ctx.settings.output_dir,
            &PolicyExport::file_name(&inventory.tenancy_id),
            &export,
        )?;
        print_success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}
