//! Integration tests for the queue engine.

use std::sync::Arc;

use chrono::{TimeDelta, TimeZone, Utc};
use rescue::store::Memory;
use rescue::task::{Core, Cron, Gate, Meta, Node, ObjectId, Root, Task};
use rescue::timer::Frozen;
use rescue::{Engine, EngineConfig, Error};

/// Engines sharing one in-memory store and one frozen clock.
struct Fleet {
    memory: Arc<Memory>,
    timer: Arc<Frozen>,
}

impl Fleet {
    fn new() -> Self {
        Self {
            memory: Arc::new(Memory::new()),
            timer: Arc::new(Frozen::new(
                Utc.with_ymd_and_hms(2023, 10, 5, 12, 30, 0).unwrap(),
            )),
        }
    }

    fn engine(&self, worker: &str) -> Engine {
        Engine::new(
            EngineConfig::memory(self.memory.clone())
                .timer(self.timer.clone())
                .worker(worker)
                .ttl(TimeDelta::seconds(30)),
        )
    }

    fn advance(&self, secs: i64) {
        self.timer.advance(TimeDelta::seconds(secs));
    }
}

fn meta(value: &str) -> Meta {
    Meta::new().with("test.api.io/key", value)
}

fn task(value: &str) -> Task {
    Task::new().meta(meta(value))
}

fn everything() -> Task {
    Task::new().meta(Meta::new().with("*", "*"))
}

fn value(t: &Task) -> &str {
    t.meta.as_ref().unwrap().get("test.api.io/key").unwrap()
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[test]
fn create_assigns_object_and_default_node() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    let t1 = a.create(task("foo")).unwrap();
    let t2 = a.create(task("bar")).unwrap();

    assert!(t1.object().is_some());
    assert!(t2.object() > t1.object());
    assert_eq!(t1.node, Some(Node::any()));
    assert!(!t1.is_owned());
}

#[test]
fn object_ids_stay_unique_across_engines_on_one_instant() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    let t1 = a.create(task("foo")).unwrap();
    let t2 = b.create(task("bar")).unwrap();
    let t3 = a.create(task("baz")).unwrap();

    assert!(t1.object() < t2.object());
    assert!(t2.object() < t3.object());
}

#[test]
fn create_rejects_invalid_tasks() {
    let a = Engine::in_memory();

    assert!(matches!(a.create(Task::new()), Err(Error::TaskEmpty)));
    assert!(matches!(
        a.create(Task::new().node(Node::all())),
        Err(Error::TaskMetaEmpty)
    ));
    assert!(matches!(
        a.create(Task::new().meta(Meta::new().with("sync.rescue.io/paging", "x"))),
        Err(Error::LabelReserved(_))
    ));
    assert!(matches!(
        a.create(task("foo").core(Core::object(ObjectId(1)))),
        Err(Error::TaskCore(_))
    ));
    assert!(a.lister(&everything()).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Search and delete
// ---------------------------------------------------------------------------

#[test]
fn single_worker_drains_queue_in_order() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    for v in ["t0", "t1", "t2", "t3", "t4"] {
        a.create(task(v)).unwrap();
    }

    let mut claimed = Vec::new();
    for _ in 0..5 {
        let t = a.search().unwrap();
        assert_eq!(t.worker(), Some("a"));
        assert!(t.core.as_ref().unwrap().expiry.is_some());
        claimed.push(t);
    }
    assert_eq!(
        claimed.iter().map(value).collect::<Vec<_>>(),
        ["t0", "t1", "t2", "t3", "t4"]
    );
    assert!(a.search().unwrap_err().is_task_not_found());

    for t in &claimed {
        a.delete(t).unwrap();
    }
    assert!(a.lister(&everything()).unwrap().is_empty());
}

#[test]
fn search_on_empty_queue_is_not_found() {
    let a = Engine::in_memory();
    assert!(a.search().unwrap_err().is_task_not_found());
}

#[test]
fn workers_stop_at_their_fair_share() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    for v in ["t0", "t1", "t2", "t3"] {
        a.create(task(v)).unwrap();
    }

    a.search().unwrap();
    b.search().unwrap();
    a.search().unwrap();
    assert!(a.search().unwrap_err().is_task_not_found());
    b.search().unwrap();
    assert!(b.search().unwrap_err().is_task_not_found());

    let owned = a.lister(&everything()).unwrap();
    assert_eq!(owned.iter().filter(|t| t.worker() == Some("a")).count(), 2);
    assert_eq!(owned.iter().filter(|t| t.worker() == Some("b")).count(), 2);
}

#[test]
fn uni_tasks_go_to_their_target_first() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    a.create(task("anyone")).unwrap();
    a.create(task("only-b").node(Node::uni("b"))).unwrap();

    let tb = b.search().unwrap();
    assert_eq!(value(&tb), "only-b");

    let ta = a.search().unwrap();
    assert_eq!(value(&ta), "anyone");
    assert!(a.search().unwrap_err().is_task_not_found());
}

#[test]
fn uni_task_for_someone_else_is_left_alone() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("only-b").node(Node::uni("b"))).unwrap();
    assert!(a.search().unwrap_err().is_task_not_found());
}

#[test]
fn delete_of_unknown_task_is_outdated() {
    let a = Engine::in_memory();
    let ghost = Task::new().core(Core::object(ObjectId(7)));
    assert!(a.delete(&ghost).unwrap_err().is_task_outdated());
}

#[test]
fn delete_without_object_is_rejected() {
    let a = Engine::in_memory();
    assert!(matches!(
        a.delete(&task("foo")),
        Err(Error::TaskCore(_))
    ));
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[test]
fn expired_lease_is_reclaimed_and_stale_delete_is_outdated() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    a.create(task("foo")).unwrap();
    let held = a.search().unwrap();

    fleet.advance(31);
    assert!(b.search().unwrap_err().is_task_not_found());

    b.expire().unwrap();
    let stored = b.lister(&everything()).unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].is_owned());
    assert_eq!(stored[0].core.as_ref().unwrap().cycles, 1);

    let taken = b.search().unwrap();
    assert_eq!(taken.worker(), Some("b"));

    assert!(a.delete(&held).unwrap_err().is_task_outdated());
    let stored = b.lister(&everything()).unwrap();
    assert_eq!(stored[0].core.as_ref().unwrap().cycles, 2);
    assert_eq!(stored[0].worker(), Some("b"));

    b.delete(&taken).unwrap();
    assert!(!b.exists(&everything()).unwrap());
}

#[test]
fn active_leases_survive_expire() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("foo")).unwrap();
    a.search().unwrap();

    fleet.advance(29);
    a.expire().unwrap();
    assert_eq!(a.lister(&everything()).unwrap()[0].worker(), Some("a"));
}

#[test]
fn extend_pushes_the_lease() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    a.create(task("foo")).unwrap();
    let held = a.search().unwrap();

    fleet.advance(20);
    a.extend(&held).unwrap();
    fleet.advance(20);
    b.expire().unwrap();

    let stored = a.lister(&everything()).unwrap();
    assert_eq!(stored[0].worker(), Some("a"));
    assert_eq!(stored[0].core.as_ref().unwrap().cycles, 0);

    assert!(b.extend(&held).unwrap_err().is_task_outdated());
    a.delete(&held).unwrap();
}

#[test]
fn extend_after_losing_the_lease_is_outdated() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("foo")).unwrap();
    let held = a.search().unwrap();

    fleet.advance(31);
    a.expire().unwrap();
    assert!(a.extend(&held).unwrap_err().is_task_outdated());
}

#[test]
fn circuit_breaker_stops_scheduling() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("flaky").core(Core::cancel(1))).unwrap();
    a.search().unwrap();

    fleet.advance(31);
    a.expire().unwrap();

    assert!(a.search().unwrap_err().is_task_not_found());
    let stored = a.lister(&everything()).unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_tripped());
}

#[test]
fn expire_reports_unfair_ownership_it_cannot_revoke() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    for i in 0..6 {
        a.create(task(&format!("t{i}"))).unwrap();
    }
    for _ in 0..6 {
        a.search().unwrap();
    }

    let err = b.expire().unwrap_err();
    assert!(err.is_task_not_revoked());
    assert_eq!(
        a.lister(&everything())
            .unwrap()
            .iter()
            .filter(|t| t.worker() == Some("a"))
            .count(),
        6
    );

    fleet.advance(31);
    b.expire().unwrap();
    assert!(a.lister(&everything()).unwrap().iter().all(|t| !t.is_owned()));
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

#[test]
fn broadcast_reaches_every_worker_once() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    a.create(task("hello").node(Node::all())).unwrap();

    let ta = a.search().unwrap();
    let tb = b.search().unwrap();
    assert_eq!(ta.worker(), Some("a"));
    assert_eq!(tb.worker(), Some("b"));
    assert_eq!(ta.object(), tb.object());

    assert!(a.search().unwrap_err().is_task_not_found());
    a.delete(&ta).unwrap();
    b.delete(&tb).unwrap();
    assert!(a.search().unwrap_err().is_task_not_found());
    assert!(b.search().unwrap_err().is_task_not_found());

    // The record itself is never touched by workers.
    let stored = a.lister(&everything()).unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].is_owned());

    assert!(a.delete(&ta).unwrap_err().is_task_outdated());
}

#[test]
fn broadcast_is_redelivered_after_local_lease_expires() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("hello").node(Node::all())).unwrap();
    let first = a.search().unwrap();

    fleet.advance(31);
    let again = a.search().unwrap();
    assert_eq!(first.object(), again.object());
}

#[test]
fn late_joiner_skips_older_broadcasts() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("hello").node(Node::all())).unwrap();
    a.search().unwrap();

    fleet.advance(1);
    let c = fleet.engine("c");
    assert!(c.search().unwrap_err().is_task_not_found());

    c.create(task("again").node(Node::all())).unwrap();
    assert_eq!(value(&c.search().unwrap()), "again");
}

#[test]
fn broadcast_can_be_removed_with_bypass() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    let created = a.create(task("hello").node(Node::all())).unwrap();
    let core = Core {
        bypass: true,
        ..Core::object(created.object().unwrap())
    };
    a.delete(&Task::new().core(core)).unwrap();
    assert!(!a.exists(&everything()).unwrap());
}

#[test]
fn broadcast_extend_keeps_local_lease() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    let created = a.create(task("hello").node(Node::all())).unwrap();
    let claimed = a.search().unwrap();

    fleet.advance(20);
    a.extend(&claimed).unwrap();
    fleet.advance(20);
    assert!(a.search().unwrap_err().is_task_not_found());

    // Never delivered to b.
    let b = fleet.engine("b");
    let foreign = Task::new().core(Core::object(created.object().unwrap()));
    assert!(b.extend(&foreign).unwrap_err().is_task_outdated());

    // Finished deliveries cannot be extended either.
    a.delete(&claimed).unwrap();
    assert!(a.extend(&claimed).unwrap_err().is_task_outdated());
}

#[test]
fn acknowledged_broadcasts_are_retired_after_retention() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");
    let b = fleet.engine("b");

    for v in ["t0", "t1", "t2"] {
        a.create(task(v).node(Node::all())).unwrap();
    }
    for engine in [&a, &b] {
        for _ in 0..3 {
            let t = engine.search().unwrap();
            engine.delete(&t).unwrap();
        }
    }

    // Inside the window the records stay for late deliveries.
    fleet.advance(30 * 60);
    a.expire().unwrap();
    assert_eq!(a.lister(&everything()).unwrap().len(), 3);

    fleet.advance(31 * 60);
    a.create(task("fresh").node(Node::all())).unwrap();
    a.expire().unwrap();

    let left = a.lister(&everything()).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(value(&left[0]), "fresh");
}

#[test]
fn retention_keeps_broadcast_templates() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(
        task("fanout")
            .node(Node::all())
            .cron(Cron::every("day")),
    )
    .unwrap();

    fleet.advance(2 * 60 * 60);
    a.expire().unwrap();
    assert_eq!(a.lister(&everything()).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[test]
fn superseded_task_is_removed_on_search() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(
        Task::new()
            .meta(Meta::new().with("test.api.io/name", "child"))
            .root(Root::new().with("test.api.io/name", "parent")),
    )
    .unwrap();
    a.create(Task::new().meta(Meta::new().with("test.api.io/name", "parent")))
        .unwrap();

    let t = a.search().unwrap();
    assert_eq!(
        t.meta.as_ref().unwrap().get("test.api.io/name").map(String::as_str),
        Some("parent")
    );
    assert!(!a
        .exists(&Task::new().meta(Meta::new().with("test.api.io/name", "child")))
        .unwrap());
}

#[test]
fn templates_are_never_handed_out() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("gate").gate(Gate::waiting(["k0"]))).unwrap();
    assert!(a.search().unwrap_err().is_task_not_found());
}

// ---------------------------------------------------------------------------
// Lister and exists
// ---------------------------------------------------------------------------

#[test]
fn lister_filters_by_labels() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("foo")).unwrap();
    a.create(task("bar")).unwrap();

    assert_eq!(a.lister(&everything()).unwrap().len(), 2);

    let foo = a.lister(&Task::new().meta(meta("foo"))).unwrap();
    assert_eq!(foo.len(), 1);
    assert_eq!(value(&foo[0]), "foo");

    assert!(a.exists(&Task::new().meta(meta("bar"))).unwrap());
    assert!(!a.exists(&Task::new().meta(meta("baz"))).unwrap());
    assert!(matches!(a.lister(&Task::new()), Err(Error::TaskEmpty)));
}

#[test]
fn lister_selects_by_owner() {
    let fleet = Fleet::new();
    let a = fleet.engine("a");

    a.create(task("foo")).unwrap();
    a.create(task("bar")).unwrap();
    a.search().unwrap();

    let selector = Task::new().core(Core {
        worker: Some("a".into()),
        ..Core::default()
    });
    let mine = a.lister(&selector).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(value(&mine[0]), "foo");
}
