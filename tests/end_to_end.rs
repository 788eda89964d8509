//! End-to-end scenarios against a scripted mock transport (`spec.md` §8).
//!
//! These drive the public API the way a real caller would — no access to
//! the crate's private test helpers — so each test queues the exact wire
//! bytes a device would produce for the scenario described.

use ocd::checksum::crc_ccitt;
use ocd::endurance::{CancelToken, EnduranceConfig, StateFile, Supervisor};
use ocd::error::Error;
use ocd::regs::dbgctl;
use ocd::session::DebugSession;
use ocd::transport::mock::{EchoBehavior, MockTransport};
use ocd::transport::Transport;

fn up_mock() -> MockTransport {
    let mut m = MockTransport::new();
    m.reset().unwrap();
    m
}

/// Same alternating pattern `fill_pattern(0, len)` produces: byte 0 forced
/// to `0xFF`, then `0xAA`/`0x55` alternating from byte 1 on.
fn checkerboard(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    for (i, b) in buf.iter_mut().enumerate() {
        *b = if i % 2 == 0 { 0xaa } else { 0x55 };
    }
    if let Some(first) = buf.first_mut() {
        *first = 0xff;
    }
    buf
}

/// Scenario 2: mass-erase, blank-check, program a checkerboard, verify.
#[test]
fn blank_check_then_program_checkerboard() {
    let mut transport = up_mock();

    // stop(): device already in DBG_MODE.
    transport.queue_response(&[dbgctl::DBG_MODE]);
    // flash_mass_erase()'s protection check: not protected.
    transport.queue_response(&[0x00]);
    // mem_size(): rev 0x0130 (general table), code 0x00 -> 0x0800 (2048 B).
    transport.queue_response(&[0x01, 0x30]);
    transport.queue_response(&[0x00]);

    let size = 0x0800usize;
    let blank_crc = crc_ccitt(0, &vec![0xffu8; size]);
    for _ in 0..4 {
        transport.queue_response(&blank_crc.to_be_bytes());
    }

    let pattern = checkerboard(size);
    let host_crc = crc_ccitt(0, &pattern);
    // write_flash's own readback-verify CRC read.
    transport.queue_response(&host_crc.to_be_bytes());
    for _ in 0..4 {
        transport.queue_response(&host_crc.to_be_bytes());
    }

    let mut session = DebugSession::new(transport);
    session.stop().unwrap();

    let mut config = EnduranceConfig {
        mtu: size, // one chunk covers the whole image
        verify_repeat: 4,
        max_cycles: 1,
        ..EnduranceConfig::default()
    };
    config.serial_port = "unused".to_string();

    let state = StateFile::open(
        tempfile::NamedTempFile::new()
            .unwrap()
            .path()
            .to_str()
            .unwrap(),
    )
    .unwrap();
    let cancel = CancelToken::new();
    let mut supervisor = Supervisor::new(session, config, state, cancel);

    let final_cycle = supervisor.run().unwrap();
    assert_eq!(final_cycle, 1);
}

/// Scenario 3: a supervisor resuming from a state file advances exactly
/// the requested number of cycles and leaves the final count persisted.
#[test]
fn endurance_resume_writes_final_cycle_count() {
    // Cycle 5 (mod 4 == 1) and cycle 6 (mod 4 == 2) both pick a
    // deterministic fill pattern; cycle 7 (mod 4 == 3) would be random, so
    // the run is bounded to stop one cycle short of it.
    let state_path = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(state_path.path(), "5\n").unwrap();

    let mut transport = up_mock();
    transport.queue_response(&[dbgctl::DBG_MODE]); // stop()

    let size = 0x0800usize;
    let blank_crc = crc_ccitt(0, &vec![0xffu8; size]);

    fn pattern_for(cycle: u64, size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; size];
        match cycle % 4 {
            0 => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = if i % 2 == 0 { 0xaa } else { 0x55 };
                }
            }
            1 => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = if i % 2 == 0 { 0x55 } else { 0xaa };
                }
            }
            _ => {}
        }
        buf[0] = 0xff;
        buf
    }

    // Cycle 5: the device-shadow probes (dbgstat/dbgrev/memsize) only
    // happen once, ever — caching keeps the second cycle from repeating
    // them.
    transport.queue_response(&[0x00]); // is_protected: not protected
    transport.queue_response(&[0x01, 0x30]); // dbgrev
    transport.queue_response(&[0x00]); // memsize code -> 0x0800
    transport.queue_response(&blank_crc.to_be_bytes()); // blank-check (verify_repeat=1)
    let host_crc_5 = crc_ccitt(0, &pattern_for(5, size));
    transport.queue_response(&host_crc_5.to_be_bytes()); // write_flash's own verify
    transport.queue_response(&host_crc_5.to_be_bytes()); // post-program verify

    // Cycle 6: only the CRC reads recur.
    transport.queue_response(&blank_crc.to_be_bytes());
    let host_crc_6 = crc_ccitt(0, &pattern_for(6, size));
    transport.queue_response(&host_crc_6.to_be_bytes());
    transport.queue_response(&host_crc_6.to_be_bytes());

    let mut session = DebugSession::new(transport);
    session.stop().unwrap();

    let mut config = EnduranceConfig {
        mtu: size,
        verify_repeat: 1,
        max_cycles: 7,
        ..EnduranceConfig::default()
    };
    config.serial_port = "unused".to_string();

    let state = StateFile::open(state_path.path().to_str().unwrap()).unwrap();
    let cancel = CancelToken::new();
    let mut supervisor = Supervisor::new(session, config, state, cancel);

    let final_cycle = supervisor.run().unwrap();
    assert_eq!(final_cycle, 7);

    let persisted = std::fs::read_to_string(state_path.path()).unwrap();
    assert_eq!(persisted.trim(), "7");
}

/// Scenario 4: a corrupted echo surfaces as `BusCollision` and takes the
/// link down until the next `reset`.
#[test]
fn bus_collision_brings_link_down() {
    let mut transport = up_mock();
    transport.set_echo_behavior(EchoBehavior::Corrupt(vec![0x12, 0x35]));

    let mut session = DebugSession::new(transport);
    let err = session.wr_pc(0x1234).unwrap_err();
    assert!(matches!(err, Error::BusCollision));
    assert!(!session.transport().is_up());

    let err = session.stop().unwrap_err();
    assert!(matches!(err, Error::LinkDown));
}

/// Scenario 5: stepping over an instruction on the legacy rev-0x0100
/// silicon must clear `IRQCTL`'s master-enable bit, stuff the original
/// opcode, then restore it because the opcode was not the DI instruction.
#[test]
fn step_on_legacy_revision_saves_and_restores_irqctl() {
    let mut transport = up_mock();
    transport.queue_response(&[dbgctl::DBG_MODE]); // stop()
    transport.queue_response(&[0x00]); // is_protected: not protected

    let mut session = DebugSession::new(transport);
    session.stop().unwrap();

    // rev 0x0100 selects the IRQCTL dance.
    session.transport().queue_response(&[0x01, 0x00]); // dbgrev
    session.transport().queue_response(&[0x00, 0x10]); // rd_pc (LE) -> 0x1000
    session
        .transport()
        .queue_response(&[ocd::regs::IRQCTL_MASTER_ENABLE]); // IRQCTL, master set
    session.transport().queue_response(&[ocd::regs::EI_OPCODE]); // opcode at pc

    session.step().unwrap();

    let written = &session.transport().written;
    // Each wr_regs(IRQCTL, [value]) frame is
    // [opcode=0x0b, addr_lo=0xc0, addr_hi=0x0f, len_lo=0x01, len_hi=0x00, value].
    let irqctl_write_with = |value: u8| {
        written
            .windows(6)
            .any(|w| w[..5] == [0x0b, 0xc0, 0x0f, 0x01, 0x00] && w[5] == value)
    };
    assert!(
        irqctl_write_with(0x00),
        "expected a wr_regs clearing IRQCTL's master-enable bit"
    );
    assert!(
        irqctl_write_with(ocd::regs::IRQCTL_MASTER_ENABLE),
        "expected a wr_regs restoring IRQCTL afterwards"
    );
}

/// Scenario 6: Intel-HEX round-trips a sparse set of cells, including one
/// past the 64 KiB extended-linear-address boundary, and nothing else.
#[test]
fn hex_round_trip_preserves_only_written_cells() {
    use ocd::hexfile::{decode, encode, HexSegment};

    let segments = vec![
        HexSegment {
            address: 0x0000,
            data: vec![0xaa],
        },
        HexSegment {
            address: 0x0001,
            data: vec![0x55],
        },
        HexSegment {
            address: 0x10000,
            data: vec![0x33],
        },
    ];
    let text = encode(&segments).unwrap();
    let decoded = decode(&text).unwrap();

    let mut cells = std::collections::BTreeMap::new();
    for seg in &decoded {
        for (i, &b) in seg.data.iter().enumerate() {
            cells.insert(seg.address as usize + i, b);
        }
    }
    assert_eq!(cells.len(), 3);
    assert_eq!(cells[&0x0000], 0xaa);
    assert_eq!(cells[&0x0001], 0x55);
    assert_eq!(cells[&0x10000], 0x33);
}
