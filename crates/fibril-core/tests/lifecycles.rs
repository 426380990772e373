use std::cell::RefCell;
use std::rc::Rc;

use fibril_core::{
    Child, ClassType, Component, ComponentError, Element, FunctionType, InstanceCx, Lifecycle,
    Props, ReconcileError, Record, Updater, Value,
};
use fibril_testing::{EventLog, TestRoot};

type Slot = Rc<RefCell<Option<Updater>>>;

/// Logs every hook it runs and renders `label:n`.
struct Probe {
    log: EventLog,
    slot: Slot,
}

impl Component for Probe {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::WILL_MOUNT
            | Lifecycle::DID_MOUNT
            | Lifecycle::WILL_RECEIVE_PROPS
            | Lifecycle::SHOULD_UPDATE
            | Lifecycle::WILL_UPDATE
            | Lifecycle::DID_UPDATE
            | Lifecycle::WILL_UNMOUNT
    }

    fn initial_state(&self, _props: &Rc<Props>) -> Option<Record> {
        Some(Record::new().with("n", 0))
    }

    fn render(&mut self, cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        self.log.push("render");
        let label = cx.props.get("label").and_then(Value::as_str).unwrap_or("");
        let n = cx.state_value("n").and_then(Value::as_int).unwrap_or(-1);
        Ok(Element::host("span", Props::new().with_children(format!("{label}:{n}"))).into())
    }

    fn component_will_mount(&mut self, cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        self.log.push("will_mount");
        cx.updater.set_state(Record::new().with("n", 1));
        Ok(())
    }

    fn component_did_mount(&mut self, cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        self.log.push("did_mount");
        *self.slot.borrow_mut() = Some(cx.updater.clone());
        Ok(())
    }

    fn component_will_receive_props(
        &mut self,
        _next_props: &Rc<Props>,
        _next_context: &Rc<Record>,
        _cx: &InstanceCx<'_>,
    ) -> Result<(), ComponentError> {
        self.log.push("will_receive_props");
        Ok(())
    }

    fn should_component_update(
        &mut self,
        _next_props: &Rc<Props>,
        _next_state: Option<&Rc<Record>>,
        _next_context: &Rc<Record>,
        _cx: &InstanceCx<'_>,
    ) -> Result<bool, ComponentError> {
        self.log.push("should_update");
        Ok(true)
    }

    fn component_will_update(
        &mut self,
        _next_props: &Rc<Props>,
        _next_state: Option<&Rc<Record>>,
        _next_context: &Rc<Record>,
        _cx: &InstanceCx<'_>,
    ) -> Result<(), ComponentError> {
        self.log.push("will_update");
        Ok(())
    }

    fn component_did_update(
        &mut self,
        _prev_props: &Rc<Props>,
        prev_state: Option<&Rc<Record>>,
        _cx: &InstanceCx<'_>,
    ) -> Result<(), ComponentError> {
        let prev = prev_state.and_then(|s| s.get("n")).and_then(Value::as_int).unwrap_or(-1);
        self.log.push(format!("did_update from {prev}"));
        Ok(())
    }

    fn component_will_unmount(&mut self, _cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        self.log.push("will_unmount");
        Ok(())
    }
}

fn probe_type(log: &EventLog, slot: &Slot) -> ClassType {
    let (log, slot) = (log.clone(), Rc::clone(slot));
    ClassType::new("Probe", move |_props, _context| {
        Ok(Probe {
            log: log.clone(),
            slot: Rc::clone(&slot),
        })
    })
}

fn mounted_probe() -> (TestRoot, EventLog, Slot, ClassType) {
    let log = EventLog::new();
    let slot: Slot = Rc::default();
    let probe = probe_type(&log, &slot);
    let mut root = TestRoot::new();
    root.render(probe.element(Props::new().with("label", "a"))).expect("mount");
    (root, log, slot, probe)
}

#[test]
fn mounting_runs_will_mount_render_did_mount() {
    let (root, log, slot, _probe) = mounted_probe();

    assert_eq!(log.entries(), ["will_mount", "render", "did_mount"]);
    // The will_mount update is folded into the first render.
    assert_eq!(root.dump(), r#"span["a:1"]"#);
    assert!(slot.borrow().is_some());
    assert_eq!(root.scheduler().instance_count(), 1);
}

#[test]
fn new_props_run_the_update_hooks() {
    let (mut root, log, _slot, probe) = mounted_probe();
    log.take();

    root.render(probe.element(Props::new().with("label", "b"))).expect("update");

    assert_eq!(
        log.entries(),
        ["will_receive_props", "should_update", "will_update", "render", "did_update from 1"]
    );
    assert_eq!(root.dump(), r#"span["b:1"]"#);
}

#[test]
fn set_state_rerenders_and_runs_its_callback_after_commit() {
    let (mut root, log, slot, _probe) = mounted_probe();
    log.take();
    let updater = slot.borrow().clone().expect("updater");

    updater.set_state_then(Record::new().with("n", 5), {
        let log = log.clone();
        move || {
            log.push("callback");
            Ok(())
        }
    });
    assert!(log.is_empty());
    root.flush().expect("update");

    assert_eq!(
        log.entries(),
        ["should_update", "will_update", "render", "did_update from 1", "callback"]
    );
    assert_eq!(root.dump(), r#"span["a:5"]"#);
}

#[test]
fn queued_updates_fold_in_order() {
    let (mut root, _log, slot, _probe) = mounted_probe();
    let updater = slot.borrow().clone().expect("updater");

    updater.set_state_with(|state, _props| {
        let n = state.and_then(|s| s.get("n")).and_then(Value::as_int).unwrap_or(0);
        Record::new().with("n", n * 10).into()
    });
    updater.set_state_with(|state, _props| {
        let n = state.and_then(|s| s.get("n")).and_then(Value::as_int).unwrap_or(0);
        Record::new().with("n", n + 2).into()
    });
    root.flush().expect("update");

    assert_eq!(root.dump(), r#"span["a:12"]"#);
}

#[test]
fn replace_state_drops_other_fields() {
    let (mut root, _log, slot, _probe) = mounted_probe();
    let updater = slot.borrow().clone().expect("updater");

    updater.replace_state(Record::new().with("other", true));
    root.flush().expect("update");

    assert_eq!(root.dump(), r#"span["a:-1"]"#);
}

#[test]
fn unmounting_runs_will_unmount_and_drops_the_instance() {
    let (mut root, log, slot, _probe) = mounted_probe();
    log.take();

    root.render(Child::Empty).expect("unmount");

    assert_eq!(log.entries(), ["will_unmount"]);
    assert_eq!(root.dump(), "");
    assert_eq!(root.scheduler().instance_count(), 0);

    // Updates to a dropped instance are ignored.
    let updater = slot.borrow().clone().expect("updater");
    updater.set_state(Record::new().with("n", 9));
    root.flush().expect("ignored");
    assert_eq!(log.entries(), ["will_unmount"]);
}

struct Gate {
    log: EventLog,
    slot: Slot,
}

impl Component for Gate {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::SHOULD_UPDATE | Lifecycle::DID_MOUNT
    }

    fn render(&mut self, cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        self.log.push("render");
        let label = cx.props.get("label").and_then(Value::as_str).unwrap_or("");
        Ok(Child::text(label))
    }

    fn component_did_mount(&mut self, cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        *self.slot.borrow_mut() = Some(cx.updater.clone());
        Ok(())
    }

    fn should_component_update(
        &mut self,
        _next_props: &Rc<Props>,
        _next_state: Option<&Rc<Record>>,
        _next_context: &Rc<Record>,
        _cx: &InstanceCx<'_>,
    ) -> Result<bool, ComponentError> {
        Ok(false)
    }
}

#[test]
fn should_update_false_keeps_the_committed_output() {
    let log = EventLog::new();
    let slot: Slot = Rc::default();
    let gate = {
        let (log, slot) = (log.clone(), Rc::clone(&slot));
        ClassType::new("Gate", move |_props, _context| {
            Ok(Gate {
                log: log.clone(),
                slot: Rc::clone(&slot),
            })
        })
    };
    let mut root = TestRoot::new();
    root.render(gate.element(Props::new().with("label", "first"))).expect("mount");
    root.render(gate.element(Props::new().with("label", "second"))).expect("update");

    assert_eq!(log.count("render"), 1);
    assert_eq!(root.dump(), r#""first""#);

    // A forced update ignores should_component_update.
    slot.borrow().clone().expect("updater").force_update();
    root.flush().expect("force");
    assert_eq!(log.count("render"), 2);
    assert_eq!(root.dump(), r#""second""#);
}

struct Plain(EventLog);

impl Component for Plain {
    fn render(&mut self, cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        self.0.push("render");
        let value = cx.props.get("value").and_then(Value::as_int).unwrap_or(0);
        Ok(Child::text(value.to_string()))
    }
}

#[test]
fn pure_classes_skip_shallow_equal_props() {
    let log = EventLog::new();
    let pure = {
        let log = log.clone();
        ClassType::builder("Pure", move |_props, _context| Ok(Plain(log.clone())))
            .pure()
            .build()
    };
    let mut root = TestRoot::new();

    root.render(pure.element(Props::new().with("value", 1))).expect("mount");
    root.render(pure.element(Props::new().with("value", 1))).expect("equal props");
    assert_eq!(log.count("render"), 1);

    root.render(pure.element(Props::new().with("value", 2))).expect("changed props");
    assert_eq!(log.count("render"), 2);
    assert_eq!(root.dump(), r#""2""#);
}

/// Exposes its `theme` prop to descendants and renders its children.
struct ThemeProvider {
    key: &'static str,
}

impl Component for ThemeProvider {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::CHILD_CONTEXT
    }

    fn render(&mut self, cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        Ok(cx.props.children().clone())
    }

    fn get_child_context(&self, cx: &InstanceCx<'_>) -> Result<Option<Record>, ComponentError> {
        let theme = cx.props.get("theme").cloned().unwrap_or_default();
        Ok(Some(Record::new().with(self.key, theme)))
    }
}

fn themed_label(log: &EventLog) -> FunctionType {
    let log = log.clone();
    FunctionType::with_context("Themed", &["theme"], move |_props, context| {
        log.push("Themed");
        let theme = context.get("theme").and_then(Value::as_str).unwrap_or("none").to_owned();
        Ok(Element::host("span", Props::new().with_children(theme)))
    })
}

#[test]
fn child_context_reaches_descendants_and_invalidates_them() {
    let log = EventLog::new();
    let provider = ClassType::builder("ThemeProvider", |_props, _context| {
        Ok(ThemeProvider { key: "theme" })
    })
    .child_context_types(&["theme"])
    .build();
    let label_props = Rc::new(Props::new());
    let label = themed_label(&log).element(Props::new());
    let view = |theme: &str| {
        provider.element(
            Props::new()
                .with("theme", theme)
                .with_children(label.clone().with_shared_props(Rc::clone(&label_props))),
        )
    };

    let mut root = TestRoot::new();
    root.render(view("dark")).expect("mount");
    assert_eq!(root.dump(), r#"span["dark"]"#);

    // The label's own props are unchanged, but the context it reads is not.
    root.render(view("light")).expect("update");
    assert_eq!(root.dump(), r#"span["light"]"#);
    assert_eq!(log.count("Themed"), 2);
}

#[test]
fn undeclared_child_context_keys_are_rejected() {
    let provider = ClassType::builder("Leaky", |_props, _context| Ok(ThemeProvider { key: "other" }))
        .child_context_types(&["theme"])
        .build();
    let mut root = TestRoot::new();

    let error = root.render(provider.element(Props::new())).err().expect("error");

    assert_eq!(
        error,
        ReconcileError::UndeclaredChildContext {
            component: Rc::from("Leaky"),
            key: Rc::from("other"),
        }
    );
    assert_eq!(root.dump(), "");
}

#[test]
fn child_context_without_declared_types_is_rejected() {
    let provider = ClassType::new("Undeclared", |_props, _context| Ok(ThemeProvider { key: "theme" }));
    let mut root = TestRoot::new();

    let error = root.render(provider.element(Props::new())).err().expect("error");

    assert_eq!(
        error,
        ReconcileError::MissingChildContextTypes {
            component: Rc::from("Undeclared"),
        }
    );
}

#[test]
fn non_record_state_is_an_error() {
    let (mut root, _log, slot, _probe) = mounted_probe();
    let updater = slot.borrow().clone().expect("updater");

    updater.set_state(7);
    let error = root.flush().err().expect("invalid state");

    assert_eq!(
        error,
        ReconcileError::InvalidState {
            component: Rc::from("Probe"),
            found: "int",
        }
    );
}

/// Mounts `child` (or a leaf) and logs its own did_mount.
struct Nested {
    name: &'static str,
    log: EventLog,
    child: Option<ClassType>,
}

impl Component for Nested {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::DID_MOUNT
    }

    fn render(&mut self, _cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        Ok(match &self.child {
            Some(child) => child.element(Props::new()).into(),
            None => Element::host("i", Props::new()).into(),
        })
    }

    fn component_did_mount(&mut self, _cx: &InstanceCx<'_>) -> Result<(), ComponentError> {
        self.log.push(format!("did_mount {}", self.name));
        Ok(())
    }
}

fn nested(name: &'static str, log: &EventLog, child: Option<ClassType>) -> ClassType {
    let log = log.clone();
    ClassType::new(name, move |_props, _context| {
        Ok(Nested {
            name,
            log: log.clone(),
            child: child.clone(),
        })
    })
}

#[test]
fn descendants_commit_before_their_ancestors() {
    let log = EventLog::new();
    let inner = nested("inner", &log, None);
    let middle = nested("middle", &log, Some(inner));
    let outer = nested("outer", &log, Some(middle));
    let mut root = TestRoot::new();

    root.render(outer.element(Props::new())).expect("mount");

    assert_eq!(log.entries(), ["did_mount inner", "did_mount middle", "did_mount outer"]);
    assert_eq!(root.dump(), "i");
}
