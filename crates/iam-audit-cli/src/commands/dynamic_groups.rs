use anyhow::Result;
use iam_audit_core::report::{DynamicGroupExport, write_json};
use iam_audit_core::{DynamicGroupAnalysis, DynamicGroupFilter};

use crate::cli::{DynamicGroupArgs, DynamicGroupFilterArgs};
use crate::commands::RunContext;
use crate::output::{print_dynamic_group_rows, print_success, print_summary};

impl From<&DynamicGroupFilterArgs> for DynamicGroupFilter {
    fn from(args: &DynamicGroupFilterArgs) -> Self {
        Self {
            name: args.name.clone(),
            domain: args.domain.clone(),
            rule_type: args.rule_type.clone(),
            ocid: args.ocid.clone(),
        }
    }
}

pub async fn run(ctx: RunContext, args: &DynamicGroupArgs) -> Result<()> {
    let analysis = DynamicGroupAnalysis::connect(&ctx.provider, &ctx.mode, ctx.options.clone())?;
    let inventory = analysis.load_dynamic_groups().await?;

    let filter = DynamicGroupFilter::from(&args.filter);
    let export = inventory.export(&filter);
    print_dynamic_group_rows(&export.filtered_dynamic_groups, ctx.settings.format)?;
    print_summary(&inventory.summary);

    if args.write_json {
        let path = write_json(
            &ctx.settings.output_dir,
            &DynamicGroupExport::file_name(&inventory.tenancy_id),
            &export,
        )?;
        print_success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}
