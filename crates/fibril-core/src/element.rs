//! Element descriptions: what a render function asks the reconciler to build.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::component::Component;
use crate::error::ComponentError;
use crate::value::{Record, Value};

/// Inputs of a host element or component.
///
/// Props are shared behind `Rc`; the reconciler compares them by reference
/// to decide whether a fiber can bail out.
#[derive(Clone, Default)]
pub struct Props {
    attributes: Record,
    children: Child,
    hidden: bool,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.set(key, value);
        self
    }

    pub fn with_children(mut self, children: impl Into<Child>) -> Self {
        self.children = children.into();
        self
    }

    /// Marks a host element as not visible. Its children are reconciled at
    /// [`Priority::Offscreen`](crate::Priority::Offscreen).
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn attributes(&self) -> &Record {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn children(&self) -> &Child {
        &self.children
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Host elements render a lone text child themselves instead of
    /// allocating a text fiber for it.
    pub fn text_content(&self) -> Option<&str> {
        match &self.children {
            Child::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_rc(self) -> Rc<Props> {
        Rc::new(self)
    }
}

/// Shallow comparison used by pure classes: attributes by value, children
/// by reference.
pub fn shallow_equal_props(a: &Rc<Props>, b: &Rc<Props>) -> bool {
    Rc::ptr_eq(a, b)
        || (a.hidden == b.hidden && a.attributes == b.attributes && a.children.same(&b.children))
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("attributes", &self.attributes)
            .field("children", &self.children)
            .field("hidden", &self.hidden)
            .finish()
    }
}

/// Render output: zero or more children.
#[derive(Clone, Default)]
pub enum Child {
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Element),
    List(Rc<[Child]>),
}

impl Child {
    pub fn list(children: impl IntoIterator<Item = Child>) -> Self {
        Child::List(children.into_iter().collect())
    }

    /// Reference comparison. Text compares by content.
    pub fn same(&self, other: &Child) -> bool {
        match (self, other) {
            (Child::Empty, Child::Empty) => true,
            (Child::Text(a), Child::Text(b)) => a == b,
            (Child::Element(a), Child::Element(b)) => {
                Rc::ptr_eq(&a.props, &b.props) && a.key == b.key && a.ty.same_type(&b.ty)
            }
            (Child::List(a), Child::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn text(text: impl Into<Rc<str>>) -> Self {
        Child::Text(text.into())
    }
}

impl fmt::Debug for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Child::Empty => f.write_str("Empty"),
            Child::Text(text) => write!(f, "Text({text:?})"),
            Child::Element(element) => write!(f, "{element:?}"),
            Child::List(list) => f.debug_list().entries(list.iter()).finish(),
        }
    }
}

impl From<Element> for Child {
    fn from(element: Element) -> Self {
        Child::Element(element)
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Child::Text(Rc::from(text))
    }
}

impl From<String> for Child {
    fn from(text: String) -> Self {
        Child::Text(Rc::from(text))
    }
}

impl From<i64> for Child {
    fn from(number: i64) -> Self {
        Child::Text(Rc::from(number.to_string()))
    }
}

impl From<Vec<Child>> for Child {
    fn from(children: Vec<Child>) -> Self {
        Child::List(children.into())
    }
}

impl From<Vec<Element>> for Child {
    fn from(children: Vec<Element>) -> Self {
        Child::List(children.into_iter().map(Child::Element).collect())
    }
}

/// A request to place one node of some type at a tree position.
#[derive(Clone)]
pub struct Element {
    pub ty: ElementType,
    pub key: Option<Rc<str>>,
    pub props: Rc<Props>,
}

impl Element {
    pub fn new(ty: ElementType, props: Props) -> Self {
        Self {
            ty,
            key: None,
            props: Rc::new(props),
        }
    }

    pub fn host(tag: &str, props: Props) -> Self {
        Self::new(ElementType::Host(Rc::from(tag)), props)
    }

    pub fn fragment(children: impl Into<Child>) -> Self {
        Self::new(
            ElementType::Fragment,
            Props::new().with_children(children),
        )
    }

    pub fn coroutine(children: impl Into<Child>) -> Self {
        Self::new(
            ElementType::Coroutine,
            Props::new().with_children(children),
        )
    }

    pub fn keyed(mut self, key: impl Into<Rc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Reuses an already shared props object, so identical inputs are
    /// recognized by reference.
    pub fn with_shared_props(mut self, props: Rc<Props>) -> Self {
        self.props = props;
        self
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Element");
        s.field("type", &self.ty.name());
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        s.field("props", &self.props).finish()
    }
}

/// What kind of fiber an element produces.
#[derive(Clone)]
pub enum ElementType {
    /// A host element such as `"div"`.
    Host(Rc<str>),
    /// A function whose first call decides whether it is a plain render
    /// function or a factory returning a stateful instance.
    Function(FunctionType),
    /// A stateful component type.
    Class(ClassType),
    Fragment,
    Coroutine,
}

impl ElementType {
    pub fn name(&self) -> &str {
        match self {
            ElementType::Host(tag) => tag,
            ElementType::Function(function) => function.name(),
            ElementType::Class(class) => class.name(),
            ElementType::Fragment => "#fragment",
            ElementType::Coroutine => "#coroutine",
        }
    }

    /// Two element types match when they would produce the same fiber kind
    /// backed by the same definition.
    pub fn same_type(&self, other: &ElementType) -> bool {
        match (self, other) {
            (ElementType::Host(a), ElementType::Host(b)) => a == b,
            (ElementType::Function(a), ElementType::Function(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            (ElementType::Class(a), ElementType::Class(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            (ElementType::Fragment, ElementType::Fragment) => true,
            (ElementType::Coroutine, ElementType::Coroutine) => true,
            _ => false,
        }
    }

    pub(crate) fn context_types(&self) -> Option<&[Rc<str>]> {
        match self {
            ElementType::Function(function) => function.inner.context_types.as_deref(),
            ElementType::Class(class) => class.inner.context_types.as_deref(),
            _ => None,
        }
    }
}

/// Result of invoking a [`FunctionType`].
pub enum Rendered {
    Children(Child),
    Instance(Box<dyn Component>),
}

type RenderFn = dyn Fn(&Rc<Props>, &Record) -> Result<Rendered, ComponentError>;

struct FunctionDef {
    name: Rc<str>,
    render: Box<RenderFn>,
    context_types: Option<Rc<[Rc<str>]>>,
}

/// A render function. Cheap to clone; identity is the shared definition.
#[derive(Clone)]
pub struct FunctionType {
    inner: Rc<FunctionDef>,
}

impl FunctionType {
    /// A plain render function.
    pub fn new<F, C>(name: &str, render: F) -> Self
    where
        F: Fn(&Rc<Props>, &Record) -> Result<C, ComponentError> + 'static,
        C: Into<Child>,
    {
        Self::factory(name, move |props, context| {
            render(props, context).map(|child| Rendered::Children(child.into()))
        })
    }

    /// A function that may return either children or a component instance.
    pub fn factory<F>(name: &str, render: F) -> Self
    where
        F: Fn(&Rc<Props>, &Record) -> Result<Rendered, ComponentError> + 'static,
    {
        Self {
            inner: Rc::new(FunctionDef {
                name: Rc::from(name),
                render: Box::new(render),
                context_types: None,
            }),
        }
    }

    /// A plain render function that reads the listed context keys.
    pub fn with_context<F, C>(name: &str, context_types: &[&str], render: F) -> Self
    where
        F: Fn(&Rc<Props>, &Record) -> Result<C, ComponentError> + 'static,
        C: Into<Child>,
    {
        let mut function = Self::new(name, render);
        if let Some(def) = Rc::get_mut(&mut function.inner) {
            def.context_types = Some(context_types.iter().map(|key| Rc::from(*key)).collect());
        }
        function
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn call(&self, props: &Rc<Props>, context: &Record) -> Result<Rendered, ComponentError> {
        (self.inner.render)(props, context)
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::Function(self.clone()), props)
    }
}

bitflags! {
    /// Type-level markers of a class component.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u8 {
        /// Re-render only when props or state are not shallow-equal.
        const PURE = 1 << 0;
    }
}

type ConstructFn = dyn Fn(&Rc<Props>, &Record) -> Result<Box<dyn Component>, ComponentError>;

struct ClassDef {
    name: Rc<str>,
    construct: Box<ConstructFn>,
    flags: ClassFlags,
    context_types: Option<Rc<[Rc<str>]>>,
    child_context_types: Option<Rc<[Rc<str>]>>,
}

/// A stateful component type.
#[derive(Clone)]
pub struct ClassType {
    inner: Rc<ClassDef>,
}

/// Builder for [`ClassType`].
pub struct ClassTypeBuilder {
    def: ClassDef,
}

impl ClassType {
    pub fn builder<F, C>(name: &str, construct: F) -> ClassTypeBuilder
    where
        F: Fn(&Rc<Props>, &Record) -> Result<C, ComponentError> + 'static,
        C: Component,
    {
        ClassTypeBuilder {
            def: ClassDef {
                name: Rc::from(name),
                construct: Box::new(move |props, context| {
                    construct(props, context).map(|c| Box::new(c) as Box<dyn Component>)
                }),
                flags: ClassFlags::empty(),
                context_types: None,
                child_context_types: None,
            },
        }
    }

    /// Shorthand for a class without context or markers.
    pub fn new<F, C>(name: &str, construct: F) -> Self
    where
        F: Fn(&Rc<Props>, &Record) -> Result<C, ComponentError> + 'static,
        C: Component,
    {
        Self::builder(name, construct).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn flags(&self) -> ClassFlags {
        self.inner.flags
    }

    pub(crate) fn construct(
        &self,
        props: &Rc<Props>,
        context: &Record,
    ) -> Result<Box<dyn Component>, ComponentError> {
        (self.inner.construct)(props, context)
    }

    pub(crate) fn child_context_types(&self) -> Option<&[Rc<str>]> {
        self.inner.child_context_types.as_deref()
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::Class(self.clone()), props)
    }
}

impl ClassTypeBuilder {
    pub fn pure(mut self) -> Self {
        self.def.flags |= ClassFlags::PURE;
        self
    }

    pub fn context_types(mut self, keys: &[&str]) -> Self {
        self.def.context_types = Some(keys.iter().map(|key| Rc::from(*key)).collect());
        self
    }

    pub fn child_context_types(mut self, keys: &[&str]) -> Self {
        self.def.child_context_types = Some(keys.iter().map(|key| Rc::from(*key)).collect());
        self
    }

    pub fn build(self) -> ClassType {
        ClassType {
            inner: Rc::new(self.def),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_types_match_by_tag() {
        let a = ElementType::Host(Rc::from("div"));
        let b = ElementType::Host(Rc::from("div"));
        let c = ElementType::Host(Rc::from("span"));
        assert!(a.same_type(&b));
        assert!(!a.same_type(&c));
    }

    #[test]
    fn function_types_match_by_definition() {
        let f = FunctionType::new("f", |_, _| Ok(Child::Empty));
        let g = FunctionType::new("f", |_, _| Ok(Child::Empty));
        assert!(ElementType::Function(f.clone()).same_type(&ElementType::Function(f)));
        let h = FunctionType::new("h", |_, _| Ok(Child::Empty));
        assert!(!ElementType::Function(g).same_type(&ElementType::Function(h)));
    }

    #[test]
    fn text_content_only_for_lone_text_child() {
        let props = Props::new().with_children("hello");
        assert_eq!(props.text_content(), Some("hello"));
        let props = Props::new().with_children(vec![Child::from("a"), Child::from("b")]);
        assert_eq!(props.text_content(), None);
    }
}
