use std::time::Duration;

use tilelink::modem::*;
use tilelink::protocol::validate;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Feed everything the scripted modem has queued into the machine.
fn deliver(modem: &ScriptedModem, machine: &mut BringupMachine) {
    let mut port = modem.clone();
    let mut framer = tilelink::LineFramer::new();
    let mut buf = [0u8; 64];
    while let Ok(n) = port.read(&mut buf) {
        for line in framer.push_slice(&buf[..n]) {
            if let Some(body) = validate(&line) {
                machine.observe(body);
            }
        }
    }
}

#[test]
fn test_step_table_order() {
    let order: Vec<BringupState> = STEPS.iter().map(|s| s.state).collect();
    assert_eq!(
        order,
        vec![
            BringupState::SendVersionQuery,
            BringupState::AwaitVersion,
            BringupState::AwaitReset,
            BringupState::AwaitDateTime,
            BringupState::AwaitGpsStatus,
            BringupState::AwaitNetworkId,
            BringupState::AwaitRegistration,
        ]
    );
    for pair in STEPS.windows(2) {
        assert_eq!(pair[0].on_success, pair[1].state);
    }
    assert_eq!(STEPS[6].on_success, BringupState::Configured);
    assert_eq!(BringupState::AwaitReset.step().unwrap().timeout, secs(30));
}

#[test]
fn test_healthy_modem_reaches_configured_in_order() {
    let modem = ScriptedModem::new();
    modem.respond_to_bringup();
    let mut port = modem.clone();
    let mut machine = BringupMachine::new();

    let mut events = Vec::new();
    for _ in 0..20 {
        deliver(&modem, &mut machine);
        let event = machine.poll(&mut port, secs(1)).unwrap();
        events.push(event);
        if event == BringupEvent::Configured {
            break;
        }
    }

    assert!(machine.is_configured());
    assert_eq!(machine.restarts(), 0);
    assert_eq!(
        modem.written_lines(),
        vec!["$FV*10", "$RS*01", "$DT 5*05", "$GS 5*01", "$GN 5*1C", "$RT 5*13"]
    );
    assert_eq!(events.last(), Some(&BringupEvent::Configured));
}

#[test]
fn test_timeout_anywhere_restarts_from_version_query() {
    let modem = ScriptedModem::new();
    modem.respond_to("$FV", &["$FV 2021-09-20,20"]);
    modem.respond_to("$RS", &["$TILE BOOT,RUNNING"]);
    let mut port = modem.clone();
    let mut machine = BringupMachine::new();

    // Version and reset succeed, then the date/time step never answers.
    for _ in 0..3 {
        deliver(&modem, &mut machine);
        machine.poll(&mut port, secs(0)).unwrap();
    }
    assert_eq!(machine.state(), BringupState::AwaitDateTime);

    deliver(&modem, &mut machine);
    assert_eq!(
        machine.poll(&mut port, secs(3)).unwrap(),
        BringupEvent::Waiting
    );
    assert_eq!(
        machine.poll(&mut port, secs(4)).unwrap(),
        BringupEvent::TimedOut {
            from: BringupState::AwaitDateTime
        }
    );
    assert_eq!(machine.state(), BringupState::AwaitVersion);
    assert_eq!(machine.restarts(), 1);
    assert_eq!(machine.deadline(), secs(8));

    let lines = modem.written_lines();
    assert_eq!(lines.last().map(String::as_str), Some("$FV*10"));
    assert_eq!(lines.iter().filter(|l| l.as_str() == "$FV*10").count(), 2);
}

#[test]
fn test_silent_modem_keeps_retrying_version() {
    let modem = ScriptedModem::new();
    let mut port = modem.clone();
    let mut machine = BringupMachine::new();

    machine.poll(&mut port, secs(0)).unwrap();
    for round in 1..=3u64 {
        let event = machine.poll(&mut port, secs(4 * round)).unwrap();
        assert_eq!(
            event,
            BringupEvent::TimedOut {
                from: BringupState::AwaitVersion
            }
        );
    }
    assert_eq!(machine.restarts(), 3);
    assert_eq!(modem.written(), "\n$FV*10\n".repeat(4));
}

#[test]
fn test_reset_wait_is_long() {
    let modem = ScriptedModem::new();
    modem.respond_to("$FV", &["$FV 2021-09-20,20"]);
    let mut port = modem.clone();
    let mut machine = BringupMachine::new();

    machine.poll(&mut port, secs(0)).unwrap();
    deliver(&modem, &mut machine);
    machine.poll(&mut port, secs(1)).unwrap();
    assert_eq!(machine.state(), BringupState::AwaitReset);

    assert_eq!(machine.poll(&mut port, secs(30)).unwrap(), BringupEvent::Waiting);
    assert!(matches!(
        machine.poll(&mut port, secs(31)).unwrap(),
        BringupEvent::TimedOut { .. }
    ));
}
