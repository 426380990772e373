use std::cell::RefCell;
use std::rc::Rc;

use fibril_core::{
    Child, ClassType, Component, ComponentError, Element, FunctionType, InstanceCx, Lifecycle,
    Priority, Props, Record, Updater, Value,
};
use fibril_testing::{EventLog, HostOp, TestRoot, UnitBudget};

fn item(log: &EventLog) -> FunctionType {
    let log = log.clone();
    FunctionType::new("Item", move |props, _context| {
        let n = props.get("n").and_then(Value::as_int).unwrap_or(0);
        log.push("Item");
        Ok(Element::host("li", Props::new().with_children(n)))
    })
}

fn wide_list(item: &FunctionType, len: i64) -> Element {
    let children = (0..len)
        .map(|n| Child::from(item.element(Props::new().with("n", n)).keyed(n.to_string())))
        .collect::<Vec<_>>();
    Element::host("ul", Props::new().with_children(children))
}

#[test]
fn deferred_work_resumes_across_deadlines() {
    let log = EventLog::new();
    let item = item(&log);
    let mut root = TestRoot::new();
    root.schedule(wide_list(&item, 100)).expect("schedule");

    let mut passes = 0;
    while root.scheduler().has_pending_work() {
        root.scheduler_mut()
            .perform_deferred_work(&UnitBudget::new(10))
            .expect("work");
        passes += 1;
        assert!(passes < 100, "work did not settle");
        if root.scheduler().has_pending_work() {
            assert_eq!(root.dump(), "", "nothing commits before the pass completes");
        }
    }

    assert!(passes > 10);
    assert!(root.host().deferred_requests() >= passes - 1);
    assert_eq!(log.count("Item"), 100);
    let ul = root.host().children(root.container())[0];
    assert_eq!(root.host().children(ul).len(), 100);
}

#[test]
fn an_expired_deadline_performs_nothing() {
    let mut root = TestRoot::new();
    root.schedule(Element::host("div", Props::new())).expect("schedule");
    let requests = root.host().deferred_requests();

    root.scheduler_mut()
        .perform_deferred_work(&fibril_testing::Expired)
        .expect("work");

    assert_eq!(root.dump(), "");
    assert!(root.scheduler().has_pending_work());
    assert_eq!(root.host().deferred_requests(), requests + 1);
}

#[test]
fn a_newer_render_restarts_the_pass() {
    let log = EventLog::new();
    let item = item(&log);
    let mut root = TestRoot::new();
    root.schedule(wide_list(&item, 20)).expect("schedule");
    root.scheduler_mut()
        .perform_deferred_work(&UnitBudget::new(5))
        .expect("partial");

    root.render(Element::host("p", Props::new())).expect("replace");

    assert_eq!(root.dump(), "p");
    assert!(log.count("Item") < 20);
}

struct Counter {
    log: EventLog,
    slot: Rc<RefCell<Option<Updater>>>,
}

impl Component for Counter {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::DID_MOUNT
    }

    fn initial_state(&self, _props: &Rc<Props>) -> Option<Record> {
        Some(Record::new().with("count", 0))
    }

    fn render(&mut self, cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        self.log.push("render");
        let count = cx.state_value("count").and_then(Value::as_int).unwrap_or(0);
        Ok(Element::host("b", Props::new().with_children(count)).into())
    }

    fn component_did_mount(&mut self, cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        *self.slot.borrow_mut() = Some(cx.updater.clone());
        Ok(())
    }
}

fn mounted_counter() -> (TestRoot, EventLog, Updater) {
    let log = EventLog::new();
    let slot = Rc::new(RefCell::new(None));
    let counter = {
        let (log, slot) = (log.clone(), Rc::clone(&slot));
        ClassType::new("Counter", move |_props, _context| {
            Ok(Counter {
                log: log.clone(),
                slot: Rc::clone(&slot),
            })
        })
    };
    let mut root = TestRoot::new();
    root.render(counter.element(Props::new())).expect("mount");
    log.take();
    let updater = slot.borrow().clone().expect("updater");
    (root, log, updater)
}

fn bump(state: Option<&Rc<Record>>, _props: &Rc<Props>) -> Value {
    let count = state.and_then(|s| s.get("count")).and_then(Value::as_int).unwrap_or(0);
    Record::new().with("count", count + 1).into()
}

#[test]
fn default_priority_updates_wait_for_a_deferred_callback() {
    let (mut root, log, updater) = mounted_counter();

    updater.set_state_with(bump);
    root.scheduler_mut().dispatch_updates().expect("dispatch");

    assert_eq!(root.dump(), r#"b["0"]"#);
    assert!(root.scheduler().has_pending_work());
    assert!(log.is_empty());

    root.flush().expect("flush");
    assert_eq!(root.dump(), r#"b["1"]"#);
}

#[test]
fn synchronous_updates_are_batched_and_flushed_on_exit() {
    let (mut root, log, updater) = mounted_counter();

    root.scheduler_mut()
        .perform_with_priority(Priority::Synchronous, |_| {
            updater.set_state_with(bump);
            updater.set_state_with(bump);
            updater.set_state_with(bump);
        })
        .expect("sync");

    assert_eq!(root.dump(), r#"b["3"]"#);
    assert_eq!(log.entries(), ["render"]);
    assert!(!root.scheduler().has_pending_work());
}

#[test]
fn nested_synchronous_scopes_flush_once_at_the_outermost() {
    let (mut root, log, updater) = mounted_counter();
    let container = root.container();

    root.scheduler_mut()
        .perform_with_priority(Priority::Synchronous, |scheduler| {
            updater.set_state_with(bump);
            scheduler
                .perform_with_priority(Priority::Synchronous, |_| updater.set_state_with(bump))
                .expect("inner");
            assert_eq!(scheduler.host().dump(container), r#"b["0"]"#);
        })
        .expect("outer");

    assert_eq!(root.dump(), r#"b["2"]"#);
    assert_eq!(log.count("render"), 1);
}

#[test]
fn roots_are_reconciled_independently() {
    let mut root = TestRoot::new();
    let other_container = root.scheduler_mut().host_mut().create_container();
    let other = root.scheduler_mut().create_container(other_container);

    root.scheduler_mut()
        .update_container(other, Element::host("aside", Props::new()))
        .expect("schedule other");
    root.render(Element::host("main", Props::new())).expect("render");

    assert_eq!(root.dump(), "main");
    assert_eq!(root.host().dump(other_container), "aside");

    root.scheduler_mut().unmount_container(other).expect("unmount other");
    root.flush().expect("flush");
    assert_eq!(root.host().dump(other_container), "");
    assert_eq!(root.dump(), "main");
}

/// Renders `div[a, b]`, dropping `a` once `show` is false.
struct Toggle {
    slot: Rc<RefCell<Option<Updater>>>,
}

impl Component for Toggle {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::DID_MOUNT
    }

    fn initial_state(&self, _props: &Rc<Props>) -> Option<Record> {
        Some(Record::new().with("show", true).with("n", 0))
    }

    fn render(&mut self, cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        let show = cx.state_value("show").and_then(Value::as_bool).unwrap_or(false);
        let mut children = Vec::new();
        if show {
            children.push(Element::host("a", Props::new()).keyed("a"));
        }
        children.push(Element::host("b", Props::new()).keyed("b"));
        Ok(Element::host("div", Props::new().with_children(children)).into())
    }

    fn component_did_mount(&mut self, cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        *self.slot.borrow_mut() = Some(cx.updater.clone());
        Ok(())
    }
}

#[test]
fn deletions_survive_a_rerender_of_an_interrupted_pass() {
    let slot = Rc::new(RefCell::new(None));
    let toggle = {
        let slot = Rc::clone(&slot);
        ClassType::new("Toggle", move |_props, _context| Ok(Toggle { slot: Rc::clone(&slot) }))
    };
    let mut root = TestRoot::new();
    root.render(toggle.element(Props::new())).expect("mount");
    assert_eq!(root.dump(), "div[a, b]");
    root.take_ops();
    let updater = slot.borrow().clone().expect("updater");

    updater.set_state(Record::new().with("show", false));
    root.scheduler_mut().dispatch_updates().expect("dispatch");
    // Root, Toggle and div: the div has recorded the deletion of `a`.
    root.scheduler_mut()
        .perform_deferred_work(&UnitBudget::new(3))
        .expect("partial");
    assert_eq!(root.dump(), "div[a, b]");

    updater.set_state(Record::new().with("n", 1));
    root.flush().expect("flush");

    assert_eq!(root.dump(), "div[b]");
    let removals = root
        .take_ops()
        .into_iter()
        .filter(|op| matches!(op, HostOp::Remove { .. }))
        .count();
    assert_eq!(removals, 1);
}
