use crate::error::{Error, Result};
use bitcoin::{OutPoint, Txid};
use std::path::{Path, PathBuf};
use std::time::Instant;
use subcoin_coins_view::{CoinsDb, UtxoView};
use subcoin_utxo_db::{FileStore, RebuildProgress, UtxoDb};

const MAIN_FILE: &str = "utxo.db";
const WAL_FILE: &str = "utxo.wal";

/// Maintenance commands over a UTXO table directory.
///
/// A table directory holds the main file `utxo.db` and the write-ahead file
/// `utxo.wal`.
#[derive(Debug, clap::Subcommand)]
pub enum UtxoTool {
    /// Format an empty table.
    #[command(name = "create")]
    Create {
        #[arg(index = 1)]
        dir: PathBuf,

        /// Number of records the table is sized for.
        #[arg(long)]
        capacity: u64,
    },

    /// Print the commit tag and stats block as JSON.
    #[command(name = "info")]
    Info {
        #[arg(index = 1)]
        dir: PathBuf,
    },

    /// Look up a raw key given in hex.
    #[command(name = "get")]
    Get {
        #[arg(index = 1)]
        dir: PathBuf,

        #[arg(index = 2)]
        key: String,
    },

    /// Insert a raw key/value pair given in hex and commit it.
    #[command(name = "put")]
    Put {
        #[arg(index = 1)]
        dir: PathBuf,

        #[arg(index = 2)]
        key: String,

        #[arg(index = 3)]
        value: String,
    },

    /// Remove a raw key given in hex and commit the removal.
    #[command(name = "remove")]
    Remove {
        #[arg(index = 1)]
        dir: PathBuf,

        #[arg(index = 2)]
        key: String,
    },

    /// Look up a coin by outpoint.
    ///
    /// The txid is given in the usual reversed display order.
    #[command(name = "coin")]
    Coin {
        #[arg(index = 1)]
        dir: PathBuf,

        #[arg(index = 2)]
        txid: String,

        #[arg(index = 3)]
        vout: u32,
    },

    /// Recount the table and compare against its stats block.
    #[command(name = "verify")]
    Verify {
        #[arg(index = 1)]
        dir: PathBuf,
    },

    /// Compact the table into a new directory.
    ///
    /// With `--resume`, an interrupted rebuild in `out` continues from the
    /// progress recorded in its commit tag.
    #[command(name = "rebuild")]
    Rebuild {
        #[arg(index = 1)]
        dir: PathBuf,

        #[arg(index = 2)]
        out: PathBuf,

        /// Capacity of the new table, defaults to the current one.
        #[arg(long)]
        capacity: Option<u64>,

        #[arg(long)]
        resume: bool,
    },

    /// Insert random outpoint-shaped records and report the throughput.
    #[command(name = "bench-insert")]
    BenchInsert {
        #[arg(index = 1)]
        dir: PathBuf,

        #[arg(long, default_value_t = 100_000)]
        count: u64,

        /// Records staged per commit.
        #[arg(long, default_value_t = 10_000)]
        commit_every: u64,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

impl UtxoTool {
    pub fn run(self) -> Result<()> {
        match self {
            Self::Create { dir, capacity } => {
                create(&dir, capacity)?;
            }
            Self::Info { dir } => {
                println!("{}", serde_json::to_string_pretty(&info(&open(&dir)?)?)?);
            }
            Self::Get { dir, key } => {
                let db = open(&dir)?;
                match db.get(&parse_hex(&key)?)? {
                    Some(value) => println!("{}", hex::encode(value)),
                    None => println!("Not found"),
                }
            }
            Self::Put { dir, key, value } => {
                let db = open(&dir)?;
                db.add(&parse_hex(&key)?, &parse_hex(&value)?)?;
                db.commit(db.tag()? + 1)?;
            }
            Self::Remove { dir, key } => {
                let db = open(&dir)?;
                if db.remove(&parse_hex(&key)?)? {
                    db.commit(db.tag()? + 1)?;
                } else {
                    println!("Not found");
                }
            }
            Self::Coin { dir, txid, vout } => {
                let txid: Txid = txid
                    .parse()
                    .map_err(|err| Error::Input(format!("Invalid txid: {err}")))?;
                let coins = CoinsDb::new(open(&dir)?);
                match coins.get(&OutPoint { txid, vout })? {
                    Some(coin) => {
                        let coin = serde_json::json!({
                            "is_coinbase": coin.is_coinbase,
                            "amount": coin.amount,
                            "height": coin.height,
                            "script_pubkey": hex::encode(&coin.script_pubkey),
                        });
                        println!("{}", serde_json::to_string_pretty(&coin)?);
                    }
                    None => println!("Not found"),
                }
            }
            Self::Verify { dir } => {
                let report = open(&dir)?.verify()?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "consistent": report.is_consistent(),
                        "occupied_slots": report.occupied_slots,
                        "records": report.records,
                        "tombstones": report.tombstones,
                        "stats_live": report.stats.live,
                        "stats_tombstones": report.stats.tombstones,
                    }))?
                );
                if !report.is_consistent() {
                    return Err(Error::Input(format!(
                        "{} does not match its stats block",
                        dir.display()
                    )));
                }
            }
            Self::Rebuild {
                dir,
                out,
                capacity,
                resume,
            } => {
                rebuild(&dir, &out, capacity, resume)?;
            }
            Self::BenchInsert {
                dir,
                count,
                commit_every,
                seed,
            } => {
                bench_insert(&dir, count, commit_every, seed)?;
            }
        }
        Ok(())
    }
}

fn table_files(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(MAIN_FILE), dir.join(WAL_FILE))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.display().to_string(),
        source,
    }
}

fn create(dir: &Path, capacity: u64) -> Result<UtxoDb<FileStore>> {
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    let (main_path, wal_path) = table_files(dir);
    if main_path.exists() {
        return Err(Error::Input(format!("{} already exists", main_path.display())));
    }

    let main = FileStore::create(&main_path).map_err(io_error(&main_path))?;
    let wal = FileStore::create(&wal_path).map_err(io_error(&wal_path))?;
    Ok(UtxoDb::new(capacity, main, wal)?)
}

fn open(dir: &Path) -> Result<UtxoDb<FileStore>> {
    let (main_path, wal_path) = table_files(dir);
    let main = FileStore::open(&main_path).map_err(io_error(&main_path))?;
    let wal = FileStore::open(&wal_path).map_err(io_error(&wal_path))?;
    Ok(UtxoDb::load(main, wal)?)
}

fn info(db: &UtxoDb<FileStore>) -> Result<serde_json::Value> {
    let stats = db.committed_stats();
    Ok(serde_json::json!({
        "tag": db.tag()?,
        "slot_count": db.slot_count(),
        "capacity": stats.capacity,
        "live": stats.live,
        "tombstones": stats.tombstones,
        "dead_values": stats.dead_values,
    }))
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let str_without_0x = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(str_without_0x).map_err(|err| Error::Input(format!("Invalid hex {input}: {err}")))
}

fn rebuild(
    dir: &Path,
    out: &Path,
    capacity: Option<u64>,
    resume: bool,
) -> Result<UtxoDb<FileStore>> {
    let source = open(dir)?;

    let report = |p: RebuildProgress| {
        tracing::info!(
            "Rebuilt {}/{} slots, {} records",
            p.slots_done,
            p.slot_count,
            p.records
        );
    };

    let target = if resume {
        source.resume_rebuild_with_progress(open(out)?, report)?
    } else {
        let capacity = capacity.unwrap_or(source.committed_stats().capacity);
        let target = create(out, capacity)?;
        source.resume_rebuild_with_progress(target, report)?
    };

    tracing::info!(
        "Rebuild into {} complete: {} records, {} dead values dropped",
        out.display(),
        target.stats().live,
        source.stats().dead_values
    );

    Ok(target)
}

fn bench_insert(dir: &Path, count: u64, commit_every: u64, seed: u64) -> Result<()> {
    let db = open(dir)?;
    let mut rng = fastrand::Rng::with_seed(seed);
    let commit_every = commit_every.max(1);

    let start = Instant::now();
    let mut key = [0u8; 36];
    let mut value = Vec::new();

    for n in 1..=count {
        rng.fill(&mut key);
        value.resize(rng.usize(8..64), 0);
        rng.fill(&mut value);
        db.add(&key, &value)?;

        if n % commit_every == 0 || n == count {
            db.commit(db.tag()? + 1)?;
            tracing::debug!("Committed {n}/{count} records");
        }
    }

    let elapsed = start.elapsed();
    let per_sec = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        "Inserted {count} records in {:.2}s ({per_sec:.0} records/s), live: {}",
        elapsed.as_secs_f64(),
        db.stats().live
    );

    Ok(())
}
