//! OSD command-line exerciser
//!
//! Drives the full initiator path against the in-memory target: CDB
//! encoding, session submission, reply decoding. Useful for demonstrating
//! the command set and for quick throughput numbers.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use osdsession::Session;
use osdtarget::InMemoryOsd;
use osdwire::types::{AttrRequest, AttributeValue, CUR_CMD_ATTR_PG, USER_COLL_PG};
use osdwire::{Command, CommandResult};

#[derive(Parser)]
#[command(name = "osdtool")]
#[command(about = "Object-based storage device exerciser", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full command-set walkthrough against a fresh target
    Scenario,
    /// Time write/read round trips
    Bench {
        /// Object size in bytes
        #[arg(short, long, default_value = "65536")]
        size: usize,
        /// Number of objects
        #[arg(short, long, default_value = "256")]
        count: usize,
    },
    /// Print the target's INQUIRY identity
    Inquiry,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    let mut session = Session::open(Box::new(InMemoryOsd::default()))
        .await
        .context("Failed to open device")?;

    match cli.command {
        Commands::Scenario => scenario(&mut session).await?,
        Commands::Bench { size, count } => bench(&mut session, size, count).await?,
        Commands::Inquiry => inquiry(&mut session).await?,
    }

    session.close().await.context("Failed to close session")?;
    Ok(())
}

/// Fail on any check condition, with the sense text in the error chain.
fn ensure(result: &CommandResult, what: &str) -> Result<()> {
    match result.sense() {
        None => Ok(()),
        Some(sense) => Err(anyhow!("{what} failed: {sense}")),
    }
}

async fn scenario(session: &mut Session) -> Result<()> {
    let result = session.submit_and_wait(&Command::format(1 << 30)).await?;
    ensure(&result, "format")?;
    println!("formatted, capacity 1 GiB");

    let pid = 0x10000;
    let result = session
        .submit_and_wait(&Command::create_partition(pid))
        .await?;
    ensure(&result, "create partition")?;
    println!("partition 0x{pid:x}");

    // Let the target pick the id and read it back through the CCAP.
    let create = Command::create(pid, 0).with_attr(AttrRequest::GetPage {
        page: CUR_CMD_ATTR_PG,
        max_len: 48,
    });
    let result = session.submit_and_wait(&create).await?;
    ensure(&result, "create object")?;
    let oid = result
        .assigned_oid()
        .ok_or_else(|| anyhow!("target assigned no object id"))?;
    println!("object 0x{oid:x}");

    let payload = Bytes::from_static(b"hello object world");
    let result = session
        .submit_and_wait(&Command::write(pid, oid, 0, payload.clone()))
        .await?;
    ensure(&result, "write")?;

    let result = session
        .submit_and_wait(&Command::read(pid, oid, 0, payload.len() as u64))
        .await?;
    ensure(&result, "read")?;
    if result.data != payload {
        return Err(anyhow!("read returned different bytes than written"));
    }
    println!("wrote and read back {} bytes", payload.len());

    let cid_result = session
        .submit_and_wait(&Command::create_collection(pid, 0).with_attr(AttrRequest::GetPage {
            page: CUR_CMD_ATTR_PG,
            max_len: 48,
        }))
        .await?;
    ensure(&cid_result, "create collection")?;
    let cid = cid_result
        .assigned_oid()
        .ok_or_else(|| anyhow!("target assigned no collection id"))?;
    let join = Command::set_attributes(pid, oid).with_attr(AttrRequest::Set {
        page: USER_COLL_PG,
        number: 1,
        value: AttributeValue::Integer64(cid),
    });
    let result = session.submit_and_wait(&join).await?;
    ensure(&result, "join collection")?;
    println!("object joined collection 0x{cid:x}");

    let result = session
        .submit_and_wait(&Command::remove_collection(pid, cid, true))
        .await?;
    ensure(&result, "remove collection")?;

    let result = session.submit_and_wait(&Command::remove(pid, oid)).await?;
    ensure(&result, "remove object")?;

    let result = session
        .submit_and_wait(&Command::remove_partition(pid, false))
        .await?;
    ensure(&result, "remove partition")?;
    println!("cleaned up");

    Ok(())
}

async fn bench(session: &mut Session, size: usize, count: usize) -> Result<()> {
    let result = session.submit_and_wait(&Command::format(1 << 32)).await?;
    ensure(&result, "format")?;
    let pid = 0x10000;
    let result = session
        .submit_and_wait(&Command::create_partition(pid))
        .await?;
    ensure(&result, "create partition")?;

    let mut rng = StdRng::seed_from_u64(0x05D);
    let mut payload = vec![0u8; size];
    rng.fill(payload.as_mut_slice());
    let payload = Bytes::from(payload);

    let start = Instant::now();
    for i in 0..count {
        let oid = 0x10000 + i as u64;
        let result = session.submit_and_wait(&Command::create(pid, oid)).await?;
        ensure(&result, "create")?;
        let result = session
            .submit_and_wait(&Command::write(pid, oid, 0, payload.clone()))
            .await?;
        ensure(&result, "write")?;
    }
    let write_elapsed = start.elapsed();
    info!(?write_elapsed, count, size, "writes done");

    let start = Instant::now();
    for i in 0..count {
        let oid = 0x10000 + i as u64;
        let result = session
            .submit_and_wait(&Command::read(pid, oid, 0, size as u64))
            .await?;
        ensure(&result, "read")?;
        if result.data.len() != size {
            return Err(anyhow!("short read on object 0x{oid:x}"));
        }
    }
    let read_elapsed = start.elapsed();

    let mib = (size * count) as f64 / (1 << 20) as f64;
    println!(
        "wrote {count} x {size} B in {:.3}s ({:.1} MiB/s)",
        write_elapsed.as_secs_f64(),
        mib / write_elapsed.as_secs_f64()
    );
    println!(
        "read  {count} x {size} B in {:.3}s ({:.1} MiB/s)",
        read_elapsed.as_secs_f64(),
        mib / read_elapsed.as_secs_f64()
    );
    Ok(())
}

async fn inquiry(session: &mut Session) -> Result<()> {
    let result = session.submit_and_wait(&Command::inquiry(36)).await?;
    ensure(&result, "inquiry")?;
    let data = &result.data;
    if data.len() < 36 {
        return Err(anyhow!("short INQUIRY data: {} bytes", data.len()));
    }
    println!("device type: 0x{:02x}", data[0]);
    println!("vendor:      {}", String::from_utf8_lossy(&data[8..16]).trim());
    println!("product:     {}", String::from_utf8_lossy(&data[16..32]).trim());
    println!("revision:    {}", String::from_utf8_lossy(&data[32..36]).trim());
    Ok(())
}
