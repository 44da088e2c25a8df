use keyledger_core::registry::{EventKind, KeyState, LedgerRegistry, LedgerSession, MemoryLedger};
use keyledger_core::{KeyId, KeyledgerError, Principal};

const KEY_NAME: &str = "MyTestKey";
const IPFS_CID: &str = "QmTestCID123456789abcdef";
const NEW_CID: &str = "QmNewCID987654321zyxwvu";

fn owner() -> Principal {
    Principal::new("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
}

fn other() -> Principal {
    Principal::new("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
}

fn sessions() -> (LedgerSession, LedgerSession) {
    let ledger = MemoryLedger::new();
    (ledger.connect(owner()), ledger.connect(other()))
}

fn key_id() -> KeyId {
    KeyId::from_name(KEY_NAME)
}

#[tokio::test]
async fn register_stores_metadata_and_emits_event() {
    let (session, _) = sessions();
    let receipt = session.register(&key_id(), IPFS_CID).await.unwrap();

    let events = session.get_events(&key_id()).await.unwrap();
    assert_eq!(events.len(), 1);
    let registered = &events[0];
    assert_eq!(registered.kind, EventKind::Registered);
    assert_eq!(registered.content_ref.as_deref(), Some(IPFS_CID));
    assert_eq!(registered.actor, owner());
    assert!(registered.timestamp > 0);
    assert_eq!(registered.tx_hash, receipt.tx_hash);

    let record = session.get_metadata(&key_id()).await.unwrap();
    assert_eq!(record.content_ref, IPFS_CID);
    assert_eq!(record.state, KeyState::Active);
    assert_eq!(record.state_label(), "ACTIVE");
    assert!(record.registered_at > 0);
    assert_eq!(record.rotated_at, 0);
    assert!(!record.was_rotated());
    assert_eq!(record.owner, owner());
}

#[tokio::test]
async fn register_adds_key_to_owner_list() {
    let (session, _) = sessions();
    session.register(&key_id(), IPFS_CID).await.unwrap();
    assert!(session
        .get_keys_for_owner(&owner())
        .await
        .unwrap()
        .contains(&key_id()));
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let (session, intruder) = sessions();
    session.register(&key_id(), IPFS_CID).await.unwrap();
    let before = session.get_metadata(&key_id()).await.unwrap();

    assert!(matches!(
        session.register(&key_id(), IPFS_CID).await,
        Err(KeyledgerError::KeyAlreadyExists(_))
    ));
    // Identity collisions are global, not per owner.
    assert!(matches!(
        intruder.register(&key_id(), NEW_CID).await,
        Err(KeyledgerError::KeyAlreadyExists(_))
    ));

    let after = session.get_metadata(&key_id()).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.content_ref, IPFS_CID);
    assert_eq!(after.registered_at, before.registered_at);
    assert_eq!(after.owner, owner());
    assert!(intruder
        .get_keys_for_owner(&other())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn rotate_updates_reference_and_timestamp() {
    let (session, _) = sessions();
    session.register(&key_id(), IPFS_CID).await.unwrap();
    session.rotate(&key_id(), NEW_CID).await.unwrap();

    let events = session.get_events(&key_id()).await.unwrap();
    let rotated = events.last().unwrap();
    assert_eq!(rotated.kind, EventKind::Rotated);
    assert_eq!(rotated.content_ref.as_deref(), Some(NEW_CID));

    let record = session.get_metadata(&key_id()).await.unwrap();
    assert_eq!(record.content_ref, NEW_CID);
    assert!(record.rotated_at > 0);
    assert!(record.is_active());
}

#[tokio::test]
async fn only_the_owner_may_rotate_or_revoke() {
    let (session, intruder) = sessions();
    session.register(&key_id(), IPFS_CID).await.unwrap();

    match intruder.rotate(&key_id(), NEW_CID).await {
        Err(KeyledgerError::Unauthorized { caller, .. }) => {
            assert_eq!(caller, other().to_string())
        }
        result => panic!("unexpected result {result:?}"),
    }
    assert!(matches!(
        intruder.revoke(&key_id()).await,
        Err(KeyledgerError::Unauthorized { .. })
    ));

    let record = session.get_metadata(&key_id()).await.unwrap();
    assert_eq!(record.content_ref, IPFS_CID);
    assert!(record.is_active());
}

#[tokio::test]
async fn rotate_checks_reference_before_existence() {
    let (session, _) = sessions();
    let ghost = KeyId::from_name("nonexistent");
    assert!(matches!(
        session.rotate(&ghost, NEW_CID).await,
        Err(KeyledgerError::KeyNotFound(_))
    ));
    assert!(matches!(
        session.rotate(&ghost, "").await,
        Err(KeyledgerError::InvalidReference)
    ));
}

#[tokio::test]
async fn revoked_keys_are_terminal() {
    let (session, _) = sessions();
    session.register(&key_id(), IPFS_CID).await.unwrap();
    session.revoke(&key_id()).await.unwrap();

    let record = session.get_metadata(&key_id()).await.unwrap();
    assert_eq!(record.state, KeyState::Revoked);
    assert_eq!(record.state_label(), "REVOKED");

    assert!(matches!(
        session.rotate(&key_id(), NEW_CID).await,
        Err(KeyledgerError::KeyRevoked(_))
    ));
    assert!(matches!(
        session.revoke(&key_id()).await,
        Err(KeyledgerError::KeyRevoked(_))
    ));

    let revoked = session.get_events(&key_id()).await.unwrap().pop().unwrap();
    assert_eq!(revoked.kind, EventKind::Revoked);
    assert_eq!(revoked.content_ref, None);
    assert_eq!(revoked.actor, owner());
}

#[tokio::test]
async fn unknown_owner_has_no_keys() {
    let (session, _) = sessions();
    session.register(&key_id(), IPFS_CID).await.unwrap();
    assert!(session
        .get_keys_for_owner(&other())
        .await
        .unwrap()
        .is_empty());

    let second = KeyId::from_name("SecondKey");
    session.register(&second, IPFS_CID).await.unwrap();
    assert_eq!(
        session.get_keys_for_owner(&owner()).await.unwrap(),
        vec![key_id(), second]
    );
}

#[tokio::test]
async fn checksummed_and_lowercase_principals_are_the_same_owner() {
    let ledger = MemoryLedger::new();
    let checksummed = ledger.connect(owner());
    let lowercase = ledger.connect(Principal::new(
        "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
    ));
    checksummed.register(&key_id(), IPFS_CID).await.unwrap();
    lowercase.rotate(&key_id(), NEW_CID).await.unwrap();
}

#[tokio::test]
async fn block_numbers_strictly_increase() {
    let ledger = MemoryLedger::new();
    let session = ledger.connect(owner());
    let mut blocks = Vec::new();
    for name in ["a", "b", "c"] {
        blocks.push(
            session
                .register(&KeyId::from_name(name), IPFS_CID)
                .await
                .unwrap()
                .block_number,
        );
    }
    assert_eq!(blocks, vec![1, 2, 3]);
    assert_eq!(ledger.block_number(), 3);
}
