//! Full-path tests: initiator commands through a session against the
//! in-memory target, exercising the same frames a remote device would see.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use osdsession::Session;
use osdtarget::InMemoryOsd;
use osdwire::types::{
    AttrRequest, AttributeValue, CUR_CMD_ATTR_PG, UIAP_LOGICAL_LEN, USER_COLL_PG, USER_INFO_PG,
    USER_TMSTMP_PG,
};
use osdwire::{Command, Outcome, SenseKey};

async fn ready_session() -> (Session, u64) {
    let mut session = Session::open(Box::new(InMemoryOsd::default()))
        .await
        .expect("in-memory target must answer");
    let result = session
        .submit_and_wait(&Command::format(1 << 30))
        .await
        .unwrap();
    assert!(result.is_success());
    let pid = 0x10000;
    let result = session
        .submit_and_wait(&Command::create_partition(pid))
        .await
        .unwrap();
    assert!(result.is_success());
    (session, pid)
}

async fn create_any(session: &mut Session, pid: u64) -> u64 {
    let cmd = Command::create(pid, 0).with_attr(AttrRequest::GetPage {
        page: CUR_CMD_ATTR_PG,
        max_len: 48,
    });
    let result = session.submit_and_wait(&cmd).await.unwrap();
    assert!(result.is_success());
    result.assigned_oid().expect("create-any reports its id")
}

#[tokio::test]
async fn full_object_lifecycle() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;

    let payload = Bytes::from_static(b"the quick brown fox");
    let result = session
        .submit_and_wait(&Command::write(pid, oid, 0, payload.clone()))
        .await
        .unwrap();
    assert!(result.is_success());

    let result = session
        .submit_and_wait(&Command::read(pid, oid, 0, payload.len() as u64))
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::Complete);
    assert_eq!(result.data, payload);

    let result = session
        .submit_and_wait(&Command::remove(pid, oid))
        .await
        .unwrap();
    assert!(result.is_success());

    // Gone means gone.
    let result = session
        .submit_and_wait(&Command::read(pid, oid, 0, 1))
        .await
        .unwrap();
    assert_eq!(result.sense().unwrap().key, SenseKey::IllegalRequest);

    let result = session
        .submit_and_wait(&Command::remove_partition(pid, false))
        .await
        .unwrap();
    assert!(result.is_success());
    session.close().await.unwrap();
}

#[tokio::test]
async fn write_read_consistency_across_sizes() {
    let (mut session, pid) = ready_session().await;
    let mut rng = StdRng::seed_from_u64(0x05D);
    // Below, at, and above typical transfer granularities.
    for size in [2usize, 4096, 8192, 65534, 256 << 10, 384 << 10] {
        let oid = create_any(&mut session, pid).await;
        let mut payload = vec![0u8; size];
        rng.fill(payload.as_mut_slice());
        let payload = Bytes::from(payload);

        let result = session
            .submit_and_wait(&Command::write(pid, oid, 0, payload.clone()))
            .await
            .unwrap();
        assert!(result.is_success(), "write of {size} bytes");

        let result = session
            .submit_and_wait(&Command::read(pid, oid, 0, size as u64))
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Complete, "read of {size} bytes");
        assert_eq!(result.data, payload, "payload of {size} bytes");
    }
}

#[tokio::test]
async fn reads_are_idempotent() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;
    let payload = Bytes::from_static(b"same answer every time");
    session
        .submit_and_wait(&Command::write(pid, oid, 0, payload.clone()))
        .await
        .unwrap();
    for _ in 0..3 {
        let result = session
            .submit_and_wait(&Command::read(pid, oid, 0, payload.len() as u64))
            .await
            .unwrap();
        assert_eq!(result.data, payload);
    }
}

#[tokio::test]
async fn read_past_end_succeeds_short() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;
    session
        .submit_and_wait(&Command::write(pid, oid, 0, Bytes::from_static(b"abcde")))
        .await
        .unwrap();
    let result = session
        .submit_and_wait(&Command::read(pid, oid, 3, 100))
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::TruncatedRead);
    assert!(result.is_success());
    assert_eq!(result.data.as_ref(), b"de");
}

#[tokio::test]
async fn object_creation_requires_partition() {
    let mut session = Session::open(Box::new(InMemoryOsd::default()))
        .await
        .unwrap();
    session
        .submit_and_wait(&Command::format(1 << 20))
        .await
        .unwrap();
    let result = session
        .submit_and_wait(&Command::create(0x10000, 0x10010))
        .await
        .unwrap();
    assert_eq!(result.sense().unwrap().key, SenseKey::IllegalRequest);
}

#[tokio::test]
async fn write_carries_attributes_both_ways() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;
    // One exchange: write the payload, stamp a user attribute, read back the
    // logical length the write produced.
    let cmd = Command::write(pid, oid, 0, Bytes::from_static(b"twelve bytes"))
        .with_attr(AttrRequest::Set {
            page: 0x30001,
            number: 5,
            value: AttributeValue::Bytes(Bytes::from_static(b"checkpoint")),
        })
        .with_attr(AttrRequest::Get {
            page: USER_INFO_PG,
            number: UIAP_LOGICAL_LEN,
            max_len: 8,
        });
    let result = session.submit_and_wait(&cmd).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.attrs.len(), 1);
    assert_eq!(result.attrs[0].as_u64(), Some(12));

    // The stamped attribute survives on its own exchange.
    let cmd = Command::get_attributes(pid, oid).with_attr(AttrRequest::Get {
        page: 0x30001,
        number: 5,
        max_len: 64,
    });
    let result = session.submit_and_wait(&cmd).await.unwrap();
    assert_eq!(result.attrs[0].value.as_ref(), b"checkpoint");
}

#[tokio::test]
async fn undersized_retrieve_returns_a_prefix() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;
    let set = Command::set_attributes(pid, oid).with_attr(AttrRequest::Set {
        page: 0x30001,
        number: 2,
        value: AttributeValue::Bytes(Bytes::from_static(b"a long attribute value")),
    });
    assert!(session.submit_and_wait(&set).await.unwrap().is_success());
    // Asking for fewer bytes than stored is a partial return, not an error.
    let get = Command::get_attributes(pid, oid).with_attr(AttrRequest::Get {
        page: 0x30001,
        number: 2,
        max_len: 6,
    });
    let result = session.submit_and_wait(&get).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.attrs[0].value.as_ref(), b"a long");
}

#[tokio::test]
async fn deleting_an_attribute_with_empty_value() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;
    let set = Command::set_attributes(pid, oid).with_attr(AttrRequest::Set {
        page: 0x30001,
        number: 1,
        value: AttributeValue::Integer64(7),
    });
    assert!(session.submit_and_wait(&set).await.unwrap().is_success());
    let del = Command::set_attributes(pid, oid).with_attr(AttrRequest::Set {
        page: 0x30001,
        number: 1,
        value: AttributeValue::Empty,
    });
    assert!(session.submit_and_wait(&del).await.unwrap().is_success());
    let get = Command::get_attributes(pid, oid).with_attr(AttrRequest::Get {
        page: 0x30001,
        number: 1,
        max_len: 8,
    });
    let result = session.submit_and_wait(&get).await.unwrap();
    assert!(result.attrs[0].value.is_empty());
}

#[tokio::test]
async fn timestamp_page_reflects_activity() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;
    session
        .submit_and_wait(&Command::write(pid, oid, 0, Bytes::from_static(b"x")))
        .await
        .unwrap();
    let cmd = Command::get_attributes(pid, oid).with_attr(AttrRequest::GetPage {
        page: USER_TMSTMP_PG,
        max_len: 30,
    });
    let result = session.submit_and_wait(&cmd).await.unwrap();
    assert!(result.is_success());
    // Five stamps, all set at or after creation.
    assert_eq!(result.attrs.len(), 5);
    let created = result.attrs[0].value.clone();
    assert!(!created.iter().all(|&b| b == 0));
}

#[tokio::test]
async fn collection_membership_end_to_end() {
    let (mut session, pid) = ready_session().await;
    let cmd = Command::create_collection(pid, 0).with_attr(AttrRequest::GetPage {
        page: CUR_CMD_ATTR_PG,
        max_len: 48,
    });
    let cid = session
        .submit_and_wait(&cmd)
        .await
        .unwrap()
        .assigned_oid()
        .unwrap();

    let mut oids = Vec::new();
    for _ in 0..3 {
        let oid = create_any(&mut session, pid).await;
        let join = Command::set_attributes(pid, oid).with_attr(AttrRequest::Set {
            page: USER_COLL_PG,
            number: 1,
            value: AttributeValue::Integer64(cid),
        });
        assert!(session.submit_and_wait(&join).await.unwrap().is_success());
        oids.push(oid);
    }

    // Stamp every member and read the stamp back in one fan-out exchange.
    let cmd = Command::set_member_attributes(pid, cid)
        .with_attr(AttrRequest::Set {
            page: 0x30002,
            number: 1,
            value: AttributeValue::Integer64(99),
        })
        .with_attr(AttrRequest::Get {
            page: 0x30002,
            number: 1,
            max_len: 8,
        });
    let result = session.submit_and_wait(&cmd).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.attrs.len(), oids.len());
    assert!(result.attrs.iter().all(|a| a.as_u64() == Some(99)));

    // Removal is refused while members remain, then forced through.
    let result = session
        .submit_and_wait(&Command::remove_collection(pid, cid, false))
        .await
        .unwrap();
    assert_eq!(result.sense().unwrap().key, SenseKey::IllegalRequest);
    let result = session
        .submit_and_wait(&Command::remove_collection(pid, cid, true))
        .await
        .unwrap();
    assert!(result.is_success());

    // Forced removal voided the membership pointers.
    let probe = Command::get_attributes(pid, oids[0]).with_attr(AttrRequest::Get {
        page: USER_COLL_PG,
        number: 1,
        max_len: 8,
    });
    let result = session.submit_and_wait(&probe).await.unwrap();
    assert!(result.attrs[0].value.is_empty());
}

#[tokio::test]
async fn membership_conflicts_surface_as_check_conditions() {
    let (mut session, pid) = ready_session().await;
    let cid1 = session
        .submit_and_wait(&Command::create_collection(pid, 0x20000))
        .await
        .unwrap();
    assert!(cid1.is_success());
    let cid2 = session
        .submit_and_wait(&Command::create_collection(pid, 0x20001))
        .await
        .unwrap();
    assert!(cid2.is_success());
    let oid = create_any(&mut session, pid).await;

    let join = |slot: u32, cid: u64| {
        Command::set_attributes(pid, oid).with_attr(AttrRequest::Set {
            page: USER_COLL_PG,
            number: slot,
            value: AttributeValue::Integer64(cid),
        })
    };
    assert!(session
        .submit_and_wait(&join(1, 0x20000))
        .await
        .unwrap()
        .is_success());
    // Rebinding the slot to a different collection fails.
    let result = session.submit_and_wait(&join(1, 0x20001)).await.unwrap();
    assert_eq!(result.sense().unwrap().key, SenseKey::IllegalRequest);
    // Joining the same collection through a second slot fails too.
    let result = session.submit_and_wait(&join(2, 0x20000)).await.unwrap();
    assert_eq!(result.sense().unwrap().key, SenseKey::IllegalRequest);
}

#[tokio::test]
async fn format_resets_everything() {
    let (mut session, pid) = ready_session().await;
    let oid = create_any(&mut session, pid).await;
    session
        .submit_and_wait(&Command::write(pid, oid, 0, Bytes::from_static(b"gone")))
        .await
        .unwrap();
    assert!(session
        .submit_and_wait(&Command::format(1 << 20))
        .await
        .unwrap()
        .is_success());
    let result = session
        .submit_and_wait(&Command::read(pid, oid, 0, 4))
        .await
        .unwrap();
    assert_eq!(result.sense().unwrap().key, SenseKey::IllegalRequest);
}
