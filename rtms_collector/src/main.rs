use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use rtms_collector::config::SERVICE_KEY_ENV;
use rtms_collector::period::{month_range, trailing_months};
use rtms_collector::table::{export, export_file_name, rows_to_frame};
use rtms_collector::{
    logging, CollectError, CollectionPlan, Collector, Config, ExportFormat, HttpSource,
    PostProcess, RegionSelection, RegionTable, YearMonth,
};

#[derive(Parser)]
#[command(version, about = "Collect apartment trade records from the MOLIT RTMS open API")]
struct Cli {
    /// TOML config file. Defaults to ./rtms.toml when it exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Legal-dong code dataset, overrides dataset.path from the config
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,
    #[command(subcommand)]
    cmd: CliCmd,
}

#[derive(Subcommand)]
enum CliCmd {
    /// List provinces, or the districts and codes of one province
    Regions {
        #[arg(long)]
        province: Option<String>,
    },
    /// Query every selected district for every selected month and export the result
    Collect(CollectArgs),
}

#[derive(Args)]
struct CollectArgs {
    /// data.go.kr service key (the decoded form)
    #[arg(long, env = SERVICE_KEY_ENV, hide_env_values = true)]
    service_key: Option<String>,
    #[arg(long = "province")]
    provinces: Vec<String>,
    #[arg(long = "district")]
    districts: Vec<String>,
    /// Every district of the given provinces
    #[arg(long)]
    all_districts: bool,
    /// Raw 5-digit LAWD_CD, bypasses the dataset
    #[arg(long = "code")]
    codes: Vec<String>,
    /// Explicit YYYYMM, repeatable
    #[arg(long = "month", conflicts_with_all = ["from", "to", "months"])]
    month: Vec<YearMonth>,
    #[arg(long, requires = "to")]
    from: Option<YearMonth>,
    #[arg(long, requires = "from")]
    to: Option<YearMonth>,
    /// Length of the window ending at the current month [default: 12]
    #[arg(long, conflicts_with_all = ["from", "to"])]
    months: Option<usize>,
    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,
    /// Output file. Defaults to apt_<districts>_<months>.<ext>
    #[arg(long)]
    out: Option<PathBuf>,
    /// Keep the API's field names and amount strings
    #[arg(long)]
    raw_keys: bool,
}

impl CollectArgs {
    fn periods(&self) -> anyhow::Result<Vec<YearMonth>> {
        if !self.month.is_empty() {
            return Ok(self.month.clone());
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            return Ok(month_range(from, to)?);
        }
        Ok(trailing_months(
            YearMonth::current(),
            self.months.unwrap_or(12),
        ))
    }

    fn selection(&self) -> RegionSelection {
        RegionSelection {
            provinces: self.provinces.clone(),
            districts: self.districts.clone(),
            all_districts: self.all_districts,
            codes: self.codes.clone(),
        }
    }
}

fn list_regions(config: &Config, province: Option<&str>) -> anyhow::Result<()> {
    let regions = RegionTable::load_or_empty(&config.dataset);
    if regions.is_empty() {
        bail!(
            "no regions available from {}",
            config.dataset.path.display()
        );
    }
    match province {
        None => {
            for province in regions.provinces() {
                println!("{province}\t{0}", regions.districts(province).count());
            }
        }
        Some(province) => {
            let mut any = false;
            for d in regions.districts(province) {
                println!("{0}\t{1}", d.code, d.district);
                any = true;
            }
            if !any {
                bail!("unknown province {province}");
            }
        }
    }
    Ok(())
}

async fn collect(config: &Config, args: CollectArgs) -> anyhow::Result<()> {
    let service_key = args
        .service_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or(CollectError::MissingCredential)
        .with_context(|| format!("pass --service-key or set {SERVICE_KEY_ENV}"))?;

    // raw codes need no dataset
    let regions = if args.provinces.is_empty() && args.districts.is_empty() {
        RegionTable::default()
    } else {
        RegionTable::load_or_empty(&config.dataset)
    };
    let districts = regions.resolve(&args.selection())?;
    let plan = CollectionPlan::new(districts, args.periods()?)?;
    info!(
        "{0} districts x {1} months = {2} requests against {3}",
        plan.districts().len(),
        plan.periods().len(),
        plan.requests().len(),
        config.api.endpoint
    );

    let source = HttpSource::new(&config.api).context("building HTTP client")?;
    let collector = Collector::new(source, config.api.mode).with_delay(config.api.delay());
    let mut collection = collector.collect(&service_key, &plan).await?;

    for report in collection.failures() {
        println!("ERR: {0} {1}", report.request, report.outcome);
    }
    println!(
        "[*] {0}/{1} requests returned transactions, {2} failed",
        collection.succeeded(),
        collection.reports.len(),
        collection.failures().count()
    );
    if collection.rows.is_empty() {
        bail!("no transactions collected; check the service key and selection (new keys take 1-2 hours to activate)");
    }

    let post = if args.raw_keys {
        PostProcess::RAW
    } else {
        PostProcess::default()
    };
    post.apply(&mut collection.rows);

    let mut df = rows_to_frame(&collection.rows)?;
    println!("{}", df.head(Some(10)));
    let bytes = export(&mut df, args.format)?;
    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(export_file_name(&plan, args.format)));
    fs::write(&out, bytes).with_context(|| format!("writing {}", out.display()))?;
    println!("[*] wrote {0} rows to {1}", df.height(), out.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing("info")?;

    let cli = Cli::parse();
    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(dataset) = cli.dataset {
        config.dataset.path = dataset;
    }

    match cli.cmd {
        CliCmd::Regions { province } => list_regions(&config, province.as_deref()),
        CliCmd::Collect(args) => collect(&config, args).await,
    }
}
