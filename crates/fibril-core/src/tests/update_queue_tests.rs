use super::*;
use crate::element::Element;
use crate::test_support::TestHost;
use std::cell::Cell;

fn merge(seq: u64, priority: Priority, key: &str, value: i64) -> Update {
    Update {
        seq,
        priority,
        kind: UpdateKind::Merge(PartialState::Value(Record::new().with(key, value).into())),
        callback: None,
    }
}

fn props() -> Rc<Props> {
    Rc::new(Props::new())
}

#[test]
fn insert_orders_by_priority_and_keeps_insertion_order_within_a_level() {
    let mut queue = UpdateQueue::new();
    queue.insert(merge(1, Priority::Low, "a", 1));
    queue.insert(merge(2, Priority::Synchronous, "b", 1));
    queue.insert(merge(3, Priority::Low, "c", 1));
    queue.insert(merge(4, Priority::Animation, "d", 1));
    queue.insert(merge(5, Priority::Synchronous, "e", 1));

    let seqs: Vec<u64> = queue.updates.iter().map(|u| u.seq).collect();
    assert_eq!(seqs, vec![2, 5, 4, 1, 3]);
    assert_eq!(queue.pending_priority(), Priority::Synchronous);
    assert_eq!(queue.len(), 5);
}

#[test]
fn fold_applies_only_updates_within_the_pass_priority() {
    let mut queue = UpdateQueue::new();
    queue.insert(merge(1, Priority::Low, "low", 1));
    queue.insert(merge(2, Priority::Synchronous, "sync", 1));

    let folded = begin_update_queue(&mut queue, "Counter", None, &props(), Priority::Synchronous)
        .expect("fold");
    let state = folded.state.expect("state");
    assert_eq!(state.get("sync"), Some(&Value::Int(1)));
    assert!(state.get("low").is_none());
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pending_priority(), Priority::Low);

    let folded = begin_update_queue(&mut queue, "Counter", Some(&state), &props(), Priority::Low)
        .expect("fold");
    let state = folded.state.expect("state");
    assert_eq!(state.get("sync"), Some(&Value::Int(1)));
    assert_eq!(state.get("low"), Some(&Value::Int(1)));
    assert!(queue.is_empty());
    assert_eq!(queue.pending_priority(), Priority::NoWork);
}

#[test]
fn fold_leaves_base_state_untouched() {
    let base = Rc::new(Record::new().with("count", 1));
    let mut queue = UpdateQueue::new();

    let folded = begin_update_queue(&mut queue, "Counter", Some(&base), &props(), Priority::Low)
        .expect("fold");
    assert!(Rc::ptr_eq(folded.state.as_ref().expect("state"), &base));

    queue.insert(merge(1, Priority::Low, "count", 2));
    let folded = begin_update_queue(&mut queue, "Counter", Some(&base), &props(), Priority::Low)
        .expect("fold");
    assert_eq!(folded.state.expect("state").get("count"), Some(&Value::Int(2)));
    assert_eq!(base.get("count"), Some(&Value::Int(1)));
}

#[test]
fn functional_updates_see_the_accumulated_state() {
    let mut queue = UpdateQueue::new();
    for seq in 1..=3 {
        queue.insert(Update {
            seq,
            priority: Priority::Low,
            kind: UpdateKind::Merge(PartialState::Function(Rc::new(|state, _props| {
                let count = state
                    .and_then(|s| s.get("count"))
                    .and_then(Value::as_int)
                    .unwrap_or(0);
                Record::new().with("count", count + 1).into()
            }))),
            callback: None,
        });
    }

    let folded =
        begin_update_queue(&mut queue, "Counter", None, &props(), Priority::Low).expect("fold");
    assert_eq!(folded.state.expect("state").get("count"), Some(&Value::Int(3)));
}

#[test]
fn replace_discards_accumulated_fields_and_null_clears_state() {
    let base = Rc::new(Record::new().with("a", 1).with("b", 2));
    let mut queue = UpdateQueue::new();
    queue.insert(Update {
        seq: 1,
        priority: Priority::Low,
        kind: UpdateKind::Replace(PartialState::Value(Record::new().with("c", 3).into())),
        callback: None,
    });
    queue.insert(merge(2, Priority::Low, "d", 4));

    let folded = begin_update_queue(&mut queue, "Counter", Some(&base), &props(), Priority::Low)
        .expect("fold");
    let state = folded.state.expect("state");
    assert_eq!(state.len(), 2);
    assert!(state.get("a").is_none());
    assert_eq!(state.get("c"), Some(&Value::Int(3)));

    queue.insert(Update {
        seq: 3,
        priority: Priority::Low,
        kind: UpdateKind::Replace(PartialState::Value(Value::Null)),
        callback: None,
    });
    let folded = begin_update_queue(&mut queue, "Counter", Some(&state), &props(), Priority::Low)
        .expect("fold");
    assert!(folded.state.is_none());
}

#[test]
fn force_flag_lasts_for_one_fold() {
    let mut queue = UpdateQueue::new();
    queue.insert(Update {
        seq: 1,
        priority: Priority::Low,
        kind: UpdateKind::Force,
        callback: None,
    });

    begin_update_queue(&mut queue, "Counter", None, &props(), Priority::Low).expect("fold");
    assert!(queue.has_force_update());

    begin_update_queue(&mut queue, "Counter", None, &props(), Priority::Low).expect("fold");
    assert!(!queue.has_force_update());
}

#[test]
fn non_record_state_is_rejected() {
    let mut queue = UpdateQueue::new();
    queue.insert(Update {
        seq: 1,
        priority: Priority::Low,
        kind: UpdateKind::Merge(PartialState::Value(Value::Int(7))),
        callback: None,
    });

    let error = begin_update_queue(&mut queue, "Counter", None, &props(), Priority::Low)
        .err()
        .expect("invalid state");
    assert_eq!(
        error,
        ReconcileError::InvalidState {
            component: Rc::from("Counter"),
            found: "int",
        }
    );
}

#[test]
fn callbacks_are_collected_in_order_and_run_once() {
    let runs = Rc::new(Cell::new(0));
    let callback = Callback::new({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            Ok(())
        }
    });
    let mut queue = UpdateQueue::new();
    let mut update = merge(1, Priority::Low, "a", 1);
    update.callback = Some(callback.clone());
    queue.insert(update);

    let folded =
        begin_update_queue(&mut queue, "Counter", None, &props(), Priority::Low).expect("fold");
    assert_eq!(folded.callbacks.len(), 1);

    folded.callbacks[0].invoke().expect("callback");
    callback.invoke().expect("second invoke is a no-op");
    assert_eq!(runs.get(), 1);
}

#[test]
fn add_update_reaches_both_buffers() {
    let mut arena: FiberArena<TestHost> = FiberArena::new();
    let element = Element::host("div", Props::new());
    let current = arena.create_from_element(&element, Priority::NoWork);
    let work = arena.clone_fiber(current, Priority::Low);

    add_update(
        &mut arena,
        current,
        1,
        PartialState::Value(Record::new().with("a", 1).into()),
        None,
        Priority::High,
    );
    add_force_update(&mut arena, work, 2, None, Priority::Synchronous);
    add_replace_update(
        &mut arena,
        work,
        3,
        PartialState::Value(Value::Null),
        None,
        Priority::Low,
    );

    for id in [current, work] {
        let queue = arena.get(id).and_then(|f| f.update_queue()).expect("queue");
        let priorities: Vec<Priority> = queue.priorities().collect();
        assert_eq!(
            priorities,
            vec![Priority::Synchronous, Priority::High, Priority::Low]
        );
    }
}
