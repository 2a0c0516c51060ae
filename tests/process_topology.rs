use damds_loader::{topology, Error};
use tempfile::TempDir;

#[test]
fn process_topology_is_written_once() {
    let dir = TempDir::new().unwrap();
    assert!(topology::global().is_err());

    let first = topology::initialize(2, 3, 1, dir.path()).unwrap();
    assert_eq!(first.workers(), 6);

    let again = topology::initialize(1, 1, 1, dir.path());
    assert!(matches!(again, Err(Error::AlreadyInitialized(_))));
    assert_eq!(topology::global().unwrap(), first);
}
