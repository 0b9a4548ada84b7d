use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use vigil_ledger_core::{
    ClientObject, ConcreteIndex, DataModel, DatabaseSchema, FieldReadApi, IndexApi, IndexJobStatus,
    IngestionApi, OrganizationId, ProvisioningApi,
};
use vigil_ledger_store::LedgerStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = LedgerStore::open(&cli.datastore)
        .await
        .with_context(|| format!("open ledger under {}", cli.datastore.display()))?;
    match cli.command {
        Command::Provision(args) => provision(&store, args).await,
        Command::Ingest(args) => ingest(&store, args).await,
        Command::Indexes(args) => list_indexes(&store, args).await,
        Command::EnsureIndex(args) => ensure_index(&store, args).await,
        Command::Export(args) => export(&store, args).await,
    }
}

#[derive(Parser)]
#[command(author, version, about = "Operator utilities for a Vigil ledger database")]
struct Cli {
    /// Directory holding ledger.json (and the SQLite file for local ledgers).
    #[arg(long, default_value = ".vigil")]
    datastore: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the organization schema and every table and field of a data model.
    Provision(ProvisionArgs),
    /// Ingest a JSON-lines file of objects into one table.
    Ingest(IngestArgs),
    /// List physical indexes and how many are still building.
    Indexes(OrgArgs),
    /// Queue an index unless an existing one already covers it, then wait for it.
    EnsureIndex(EnsureIndexArgs),
    /// Dump the current version of every object in a table as JSON lines.
    Export(ExportArgs),
}

#[derive(Parser)]
struct OrgArgs {
    /// Organization id; its tenant schema is derived from it.
    #[arg(long)]
    org: String,
}

#[derive(Parser)]
struct ProvisionArgs {
    #[command(flatten)]
    org: OrgArgs,
    /// Data model JSON file.
    #[arg(long)]
    model: PathBuf,
}

#[derive(Parser)]
struct IngestArgs {
    #[command(flatten)]
    org: OrgArgs,
    #[arg(long)]
    model: PathBuf,
    #[arg(long)]
    table: String,
    /// One JSON object per line.
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value_t = 1_000)]
    batch_size: usize,
}

#[derive(Parser)]
struct EnsureIndexArgs {
    #[command(flatten)]
    org: OrgArgs,
    #[arg(long)]
    table: String,
    /// Indexed columns, in key order.
    #[arg(long, value_delimiter = ',', required = true)]
    columns: Vec<String>,
    /// Covering columns (ignored on SQLite).
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,
}

#[derive(Parser)]
struct ExportArgs {
    #[command(flatten)]
    org: OrgArgs,
    #[arg(long)]
    model: PathBuf,
    #[arg(long)]
    table: String,
    /// Defaults to stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

impl OrgArgs {
    fn schema(&self) -> Result<DatabaseSchema> {
        let org = OrganizationId::from_uuid_str(&self.org)
            .with_context(|| format!("invalid organization id '{}'", self.org))?;
        Ok(DatabaseSchema::for_organization(org))
    }
}

fn read_model(path: &PathBuf) -> Result<DataModel> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let model: DataModel =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    model.validate()?;
    Ok(model)
}

async fn provision(store: &LedgerStore, args: ProvisionArgs) -> Result<()> {
    let schema = args.org.schema()?;
    let model = read_model(&args.model)?;
    store.provision_data_model(&schema, &model).await?;
    println!(
        "provisioned {} tables into {}",
        model.tables.len(),
        schema.schema
    );
    Ok(())
}

async fn ingest(store: &LedgerStore, args: IngestArgs) -> Result<()> {
    let schema = args.org.schema()?;
    let model = read_model(&args.model)?;
    let table = model.table(&args.table)?;
    let file = fs::File::open(&args.input)
        .with_context(|| format!("open {}", args.input.display()))?;

    let mut batch: Vec<ClientObject> = Vec::with_capacity(args.batch_size);
    let (mut inserted, mut obsoleted, mut dropped) = (0usize, 0usize, 0usize);
    let mut lines = BufReader::new(file).lines().enumerate().peekable();
    while let Some((number, line)) = lines.next() {
        let line = line.with_context(|| format!("read line {}", number + 1))?;
        if !line.trim().is_empty() {
            let raw: serde_json::Value = serde_json::from_str(&line)
                .with_context(|| format!("line {} is not JSON", number + 1))?;
            let object = ClientObject::from_json(table, &raw)
                .with_context(|| format!("line {}", number + 1))?;
            batch.push(object);
        }
        if batch.len() >= args.batch_size.max(1) || (lines.peek().is_none() && !batch.is_empty()) {
            let report = store.ingest_objects(&schema, table, &batch).await?;
            inserted += report.inserted;
            obsoleted += report.obsoleted;
            dropped += report.dropped;
            batch.clear();
        }
    }
    println!("inserted={inserted} obsoleted={obsoleted} dropped={dropped}");
    Ok(())
}

async fn list_indexes(store: &LedgerStore, args: OrgArgs) -> Result<()> {
    let schema = args.schema()?;
    for physical in store.list_physical_indexes(&schema).await? {
        let mut line = format!(
            "{:?}\t{}\t{}({})",
            physical.state,
            physical.name,
            physical.index.table_name,
            physical.index.indexed.join(", ")
        );
        if !physical.index.included.is_empty() {
            line.push_str(&format!(" include({})", physical.index.included.join(", ")));
        }
        println!("{line}");
    }
    println!("pending: {}", store.count_pending_indexes(&schema).await?);
    Ok(())
}

async fn ensure_index(store: &LedgerStore, args: EnsureIndexArgs) -> Result<()> {
    let schema = args.org.schema()?;
    let index = ConcreteIndex::new(args.table, args.columns).including(args.include);
    let Some(job_id) = store.ensure_indexes(&schema, vec![index]).await? else {
        println!("already covered");
        return Ok(());
    };
    println!("queued job {job_id}");
    match store.wait_for_index_job(job_id).await? {
        IndexJobStatus::Succeeded => {
            println!("built");
            Ok(())
        }
        IndexJobStatus::Failed(reason) => bail!("index build failed: {reason}"),
        other => bail!("index build ended as {other:?}"),
    }
}

async fn export(store: &LedgerStore, args: ExportArgs) -> Result<()> {
    let schema = args.org.schema()?;
    let model = read_model(&args.model)?;
    let table = model.table(&args.table)?;
    let objects = store.list_all_objects(&schema, table).await?;

    let sink: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(
            fs::File::create(path).with_context(|| format!("create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = BufWriter::new(sink);
    for object in &objects {
        serde_json::to_writer(&mut writer, &object.data)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    eprintln!("exported {} objects from {}", objects.len(), table.name);
    Ok(())
}
