use exchange_core::instrument::{Instrument, Visibility, is_valid_ticker};
use exchange_core::ledger::Ledger;

#[test]
fn ticker_pattern_matches_two_to_ten_uppercase_letters() {
    assert!(is_valid_ticker("RUB"));
    assert!(is_valid_ticker("AB"));
    assert!(is_valid_ticker("ABCDEFGHIJ"));
    assert!(!is_valid_ticker("A"));
    assert!(!is_valid_ticker("ABCDEFGHIJK"));
    assert!(!is_valid_ticker("memecoin"));
    assert!(!is_valid_ticker("AB-CD"));
}

#[test]
fn new_instrument_is_active() {
    let instrument = Instrument::new("MEMECOIN".into(), "Meme Coin".into());
    assert!(instrument.is_active());
    assert_eq!(instrument.visibility, Visibility::Active);
}

#[tokio::test]
async fn add_instrument_rejects_duplicate_ticker() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(tmp.path()).unwrap();

    ledger.add_instrument("MEMECOIN".into(), "Meme Coin".into()).await.unwrap();
    let err = ledger.add_instrument("MEMECOIN".into(), "Duplicate".into()).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn remove_instrument_marks_deleted_and_excludes_from_listing() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(tmp.path()).unwrap();

    ledger.add_instrument("MEMECOIN".into(), "Meme Coin".into()).await.unwrap();
    ledger.remove_instrument("MEMECOIN").await.unwrap();

    let fetched = ledger.get_instrument("MEMECOIN").await.unwrap();
    assert!(!fetched.is_active());

    let active: Vec<_> = ledger.list_instruments().await.unwrap().into_iter().filter(Instrument::is_active).collect();
    assert!(active.is_empty());
}

#[tokio::test]
async fn remove_instrument_rejects_unknown_ticker() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(tmp.path()).unwrap();
    let err = ledger.remove_instrument("NOPE").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}
