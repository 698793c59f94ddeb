//! Opens the shared memory device, allocates one page, exchanges a greeting
//! with the device side through a mapping, and tears everything down again.
//!
//! Pass `-v` for driver debug output.

use custom_mem::protocol::{Request, errno};
use custom_mem::{Device, DriverConfig, MapError, PAGE_SIZE, Session, ViewError};
use kernel_console::ConsoleLogger;
use log::LevelFilter;
use std::process::ExitCode;

const DEVICE_GREETING: &[u8] = b"Hello from kernel space";
const CLIENT_GREETING: &[u8] = b"Hello to you too!";
const PAGE: u64 = PAGE_SIZE as u64;

#[derive(Debug, thiserror::Error)]
enum HarnessError {
    #[error("{op} failed with -{code} ({})", describe(.code))]
    Ioctl { op: &'static str, code: i32 },
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("device side has no block bound")]
    Unbound,
    #[error("check failed: {0}")]
    Check(&'static str),
}

fn describe(code: &i32) -> &'static str {
    errno::describe(*code)
}

fn main() -> ExitCode {
    let verbose = std::env::args().skip(1).any(|a| a == "-v");
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = ConsoleLogger::new(level).init() {
        eprintln!("(test) logger: {e}");
    }

    let device = Device::new(DriverConfig::default());
    match run(&device) {
        Ok(()) => {
            println!("(test) all checks passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("(test) {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(device: &Device) -> Result<(), HarnessError> {
    let session = device.open();
    println!("(test) device {} opened!", device.config().device_name());

    alloc_memory(&session)?;
    exchange(&session)?;
    free_memory(&session)?;

    if session.map().err() != Some(MapError::NotBound) {
        return Err(HarnessError::Check("map after free must fail with NotBound"));
    }

    session.close();
    println!("(test) device closed!");

    if device.live_blocks() != 0 || device.open_count() != 0 {
        return Err(HarnessError::Check("device still holds resources"));
    }
    Ok(())
}

fn ioctl(session: &Session, op: &'static str, request: Request) -> Result<(), HarnessError> {
    match session.ioctl(request.command().into_bits(), request.arg()) {
        0 => Ok(()),
        rc => Err(HarnessError::Ioctl {
            op,
            code: i32::try_from(-rc).unwrap_or(i32::MAX),
        }),
    }
}

fn alloc_memory(session: &Session) -> Result<(), HarnessError> {
    println!("(test) alloc_memory!");
    ioctl(session, "DEV_MEM_ALLOC", Request::Allocate { size: PAGE })?;
    let info = session.block().ok_or(HarnessError::Unbound)?;
    println!(
        "(test) Memory allocated! size = {} - {}",
        info.size_bytes, info.base
    );
    Ok(())
}

fn exchange(session: &Session) -> Result<(), HarnessError> {
    let view = session.map()?;

    let initial = view.read_cstr(0)?;
    println!("(test) str = {}", String::from_utf8_lossy(&initial));
    if !initial.is_empty() {
        return Err(HarnessError::Check("fresh page is not zeroed"));
    }

    view.fill(0)?;
    view.write(0, CLIENT_GREETING)?;
    view.write_byte(CLIENT_GREETING.len() as u64, 0)?;

    let seen = session
        .with_block(|block| {
            let mut buf = vec![0u8; CLIENT_GREETING.len()];
            block.read(0, &mut buf).map(|()| buf)
        })
        .ok_or(HarnessError::Unbound)?
        .map_err(ViewError::from)?;
    if seen != CLIENT_GREETING {
        return Err(HarnessError::Check("device side did not see the client write"));
    }
    println!("(test) device read: {}", String::from_utf8_lossy(&seen));

    session
        .with_block(|block| {
            block.fill(0, block.len(), 0)?;
            block.write(0, DEVICE_GREETING)
        })
        .ok_or(HarnessError::Unbound)?
        .map_err(ViewError::from)?;
    let reply = view.read_cstr(0)?;
    println!("(test) str = {}", String::from_utf8_lossy(&reply));
    if reply != DEVICE_GREETING {
        return Err(HarnessError::Check("client did not see the device write"));
    }

    session.unmap(view);
    Ok(())
}

fn free_memory(session: &Session) -> Result<(), HarnessError> {
    ioctl(session, "DEV_MEM_FREE", Request::Free)?;
    println!("(test) Memory released!");
    Ok(())
}
