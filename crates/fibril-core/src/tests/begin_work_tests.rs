use super::*;
use crate::component::{Component, InstanceCx};
use crate::element::{Element, FunctionType};
use crate::error::ComponentError;
use crate::fiber::RootId;
use crate::host::Unbounded;
use crate::test_support::TestHost;
use std::cell::Cell;

fn scheduler() -> (Scheduler<TestHost>, RootId) {
    let mut scheduler = Scheduler::new(TestHost::new());
    let root = scheduler.create_container(0);
    (scheduler, root)
}

fn committed(children: impl Into<Child>) -> (Scheduler<TestHost>, RootId) {
    let (mut scheduler, root) = scheduler();
    scheduler.update_container(root, children).expect("schedule");
    scheduler.perform_deferred_work(&Unbounded).expect("render");
    (scheduler, root)
}

fn root_fiber(scheduler: &Scheduler<TestHost>, root: RootId) -> FiberId {
    scheduler.root_current(root).expect("root fiber")
}

struct Static(Child);

impl Component for Static {
    fn render(&mut self, _cx: &InstanceCx<'_>) -> Result<Child, ComponentError> {
        Ok(self.0.clone())
    }
}

#[test]
fn host_root_places_its_first_children() {
    let (mut scheduler, root) = scheduler();
    scheduler
        .update_container(root, Element::host("div", Props::new()))
        .expect("schedule");
    let current = root_fiber(&scheduler, root);
    let wip = scheduler.fibers.clone_fiber(current, Priority::Low);

    let child = scheduler
        .begin_work(Some(current), wip, Priority::Low)
        .expect("begin")
        .expect("child");

    let fiber = scheduler.fiber(child).expect("child fiber");
    assert_eq!(fiber.tag(), WorkTag::HostComponent);
    assert_eq!(fiber.parent(), Some(wip));
    assert_eq!(fiber.effect_tag(), EffectTag::PLACEMENT);
    assert!(scheduler.fiber(wip).and_then(|f| f.memoized_props()).is_some());
    assert_eq!(scheduler.fiber(wip).and_then(|f| f.progressed_child()), Some(child));
}

#[test]
fn less_urgent_work_is_deferred_untouched() {
    let (mut scheduler, root) = scheduler();
    scheduler
        .update_container(root, Element::host("div", Props::new()))
        .expect("schedule");
    let current = root_fiber(&scheduler, root);
    let wip = scheduler.fibers.clone_fiber(current, Priority::Low);

    let next = scheduler
        .begin_work(Some(current), wip, Priority::Synchronous)
        .expect("begin");

    assert!(next.is_none());
    let fiber = scheduler.fibers.get(wip).expect("wip");
    assert!(fiber.deferred);
    assert!(fiber.pending_props.is_some());
    assert!(fiber.child.is_none());
}

#[test]
fn unchanged_root_reuses_committed_children() {
    let (mut scheduler, root) = committed(Element::host(
        "div",
        Props::new().with_children(vec![
            Element::host("a", Props::new()),
            Element::host("b", Props::new()),
        ]),
    ));
    let current = root_fiber(&scheduler, root);
    let committed_div = scheduler.fiber(current).and_then(|f| f.child()).expect("div");
    let wip = scheduler.fibers.clone_fiber(current, Priority::Low);

    let child = scheduler
        .begin_work(Some(current), wip, Priority::Low)
        .expect("begin")
        .expect("child");

    assert_ne!(child, committed_div);
    let fiber = scheduler.fiber(child).expect("clone");
    assert_eq!(fiber.alternate(), Some(committed_div));
    assert_eq!(fiber.parent(), Some(wip));
    assert!(fiber.effect_tag().is_empty());
    // The committed child keeps pointing at the committed parent.
    assert_eq!(scheduler.fiber(committed_div).and_then(|f| f.parent()), Some(current));
}

#[test]
fn hidden_host_prepares_children_offscreen() {
    let (mut scheduler, _root) = scheduler();
    let element = Element::host(
        "div",
        Props::new()
            .hidden(true)
            .with_children(Element::host("span", Props::new())),
    );
    let wip = scheduler.fibers.create_from_element(&element, Priority::Low);

    let next = scheduler.begin_work(None, wip, Priority::Low).expect("begin");

    assert!(next.is_none());
    let fiber = scheduler.fiber(wip).expect("div");
    assert!(fiber.child().is_none());
    assert_eq!(fiber.progressed_priority(), Priority::Offscreen);
    let hidden = fiber.progressed_child().expect("hidden child");
    let hidden = scheduler.fiber(hidden).expect("span");
    assert_eq!(hidden.pending_work_priority(), Priority::Offscreen);
    assert_eq!(hidden.effect_tag(), EffectTag::PLACEMENT);
}

#[test]
fn function_is_resolved_on_first_render_and_bails_out_on_same_props() {
    let (mut scheduler, _root) = scheduler();
    let calls = Rc::new(Cell::new(0));
    let label = FunctionType::new("Label", {
        let calls = Rc::clone(&calls);
        move |_props, _context| {
            calls.set(calls.get() + 1);
            Ok(Element::host("span", Props::new()))
        }
    });
    let wip = scheduler
        .fibers
        .create_from_element(&label.element(Props::new()), Priority::Low);

    let child = scheduler.begin_work(None, wip, Priority::Low).expect("begin");
    assert!(child.is_some());
    assert_eq!(scheduler.fiber(wip).map(|f| f.tag()), Some(WorkTag::Function));
    assert_eq!(calls.get(), 1);

    // Same props object again: nothing to render.
    scheduler.begin_work(None, wip, Priority::Low).expect("begin again");
    assert_eq!(calls.get(), 1);
}

#[test]
fn factory_returning_an_instance_becomes_a_class() {
    let (mut scheduler, _root) = scheduler();
    let factory = FunctionType::factory("Factory", |_props, _context| {
        Ok(Rendered::Instance(Box::new(Static(Child::text("hi")))))
    });
    let wip = scheduler
        .fibers
        .create_from_element(&factory.element(Props::new()), Priority::Low);

    let child = scheduler
        .begin_work(None, wip, Priority::Low)
        .expect("begin")
        .expect("child");

    assert_eq!(scheduler.fiber(wip).map(|f| f.tag()), Some(WorkTag::Class));
    assert_eq!(scheduler.instance_count(), 1);
    assert_eq!(scheduler.fiber(child).map(|f| f.tag()), Some(WorkTag::HostText));
}

#[test]
fn function_cannot_turn_into_an_instance_later() {
    let (mut scheduler, _root) = scheduler();
    let calls = Rc::new(Cell::new(0));
    let fickle = FunctionType::factory("Fickle", {
        let calls = Rc::clone(&calls);
        move |_props, _context| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Ok(Rendered::Children(Child::Empty))
            } else {
                Ok(Rendered::Instance(Box::new(Static(Child::Empty))))
            }
        }
    });
    let wip = scheduler
        .fibers
        .create_from_element(&fickle.element(Props::new()), Priority::Low);
    scheduler.begin_work(None, wip, Priority::Low).expect("first render");

    if let Some(fiber) = scheduler.fibers.get_mut(wip) {
        fiber.pending_props = Some(Input::Props(Rc::new(Props::new().with("n", 1))));
    }
    let error = scheduler
        .begin_work(None, wip, Priority::Low)
        .err()
        .expect("kind change");

    assert_eq!(
        error,
        ReconcileError::ComponentKindChanged {
            component: Rc::from("Fickle")
        }
    );
}

#[test]
fn render_errors_name_the_component() {
    let (mut scheduler, _root) = scheduler();
    let broken = FunctionType::new("Broken", |_props, _context| {
        Err::<Child, _>(ComponentError::new("boom"))
    });
    let wip = scheduler
        .fibers
        .create_from_element(&broken.element(Props::new()), Priority::Low);

    let error = scheduler
        .begin_work(None, wip, Priority::Low)
        .err()
        .expect("render error");

    assert_eq!(error.to_string(), "Broken: boom");
    assert_eq!(error.component_error().map(ComponentError::message), Some("boom"));
}
