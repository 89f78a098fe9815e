//! VIP allocator behavior against service snapshots.

use ballast::types::{Protocol, Scheduler, Service};
use ballast::{Error, Ipam};

fn service(id: &str, host: &str) -> Service {
    Service {
        id: id.to_string(),
        name: id.to_string(),
        host: host.to_string(),
        port: 80,
        protocol: Protocol::Tcp,
        scheduler: Scheduler::Rr,
    }
}

fn ipam(ranges: &[&str]) -> Ipam {
    let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
    Ipam::new(&ranges).unwrap()
}

#[test]
fn test_allocation_scenario() {
    // Range 10.0.0.1-10.0.0.3 with 10.0.0.1 already taken: allocations yield
    // .2, then .3, then exhaustion.
    let ipam = ipam(&["10.0.0.1-10.0.0.3"]);
    let mut snapshot = vec![service("existing", "10.0.0.1")];

    let mut first = service("first", "");
    ipam.allocate_vip(&mut first, &snapshot).unwrap();
    assert_eq!(first.host, "10.0.0.2");
    snapshot.push(first);

    let mut second = service("second", "");
    ipam.allocate_vip(&mut second, &snapshot).unwrap();
    assert_eq!(second.host, "10.0.0.3");
    snapshot.push(second);

    let mut third = service("third", "");
    let err = ipam.allocate_vip(&mut third, &snapshot).unwrap_err();
    assert!(matches!(err, Error::NoVipAvailable));
    assert!(third.host.is_empty());
}

#[test]
fn test_allocation_excludes_assigned_hosts() {
    let ipam = ipam(&["10.0.0.0/28"]);
    let snapshot: Vec<Service> = (1..=5)
        .map(|i| service(&format!("svc-{}", i), &format!("10.0.0.{}", i)))
        .collect();

    let mut svc = service("new", "");
    ipam.allocate_vip(&mut svc, &snapshot).unwrap();
    assert!(snapshot.iter().all(|s| s.host != svc.host));
    assert_eq!(svc.host, "10.0.0.6");
}

#[test]
fn test_allocation_is_deterministic() {
    // Unchanged snapshot: consecutive calls return the same first free
    // address.
    let ipam = ipam(&["10.1.0.0/24"]);
    let snapshot = vec![service("svc-1", "10.1.0.1")];

    let mut a = service("a", "");
    let mut b = service("b", "");
    ipam.allocate_vip(&mut a, &snapshot).unwrap();
    ipam.allocate_vip(&mut b, &snapshot).unwrap();
    assert_eq!(a.host, b.host);
    assert_eq!(a.host, "10.1.0.2");
}

#[test]
fn test_exhaustion_and_recovery() {
    let ipam = ipam(&["10.0.0.1-10.0.0.2"]);
    let mut snapshot = vec![
        service("svc-1", "10.0.0.1"),
        service("svc-2", "10.0.0.2"),
    ];

    let mut svc = service("new", "");
    assert!(matches!(
        ipam.allocate_vip(&mut svc, &snapshot).unwrap_err(),
        Error::NoVipAvailable
    ));

    // A released service simply leaves the snapshot; the next scan finds its
    // address again with no cursor state in the way.
    let released = snapshot.remove(0);
    ipam.release_vip(&released).unwrap();
    ipam.allocate_vip(&mut svc, &snapshot).unwrap();
    assert_eq!(svc.host, "10.0.0.1");
}

#[test]
fn test_allocation_spans_ranges() {
    let ipam = ipam(&["10.0.0.1-10.0.0.1", "10.0.1.1-10.0.1.2"]);
    let snapshot = vec![service("svc-1", "10.0.0.1")];

    let mut svc = service("new", "");
    ipam.allocate_vip(&mut svc, &snapshot).unwrap();
    assert_eq!(svc.host, "10.0.1.1");
}

#[test]
fn test_unallocated_services_do_not_block_addresses() {
    // Services still waiting for a VIP hold the empty host and must not be
    // treated as owning any address.
    let ipam = ipam(&["10.0.0.1-10.0.0.2"]);
    let snapshot = vec![service("pending-1", ""), service("pending-2", "")];

    let mut svc = service("new", "");
    ipam.allocate_vip(&mut svc, &snapshot).unwrap();
    assert_eq!(svc.host, "10.0.0.1");
}
