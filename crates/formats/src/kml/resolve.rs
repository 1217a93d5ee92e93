use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use streaming::cache::SharedFetch;
use streaming::key::split_fragment;
use tracing::{debug, warn};

use crate::kml::document::{KmlDocument, LoadError};
use crate::kml::element::{Element, Selector};
use crate::kml::registry::ElementKind;
use crate::kml::style::{
    AttributeBundle, Attributes, Merge, StyleFields, StyleState, style_map_pairs,
};

/// Resolution of one shape's styles, shared by every caller that asks while
/// it is in flight.
pub type SharedBundle = Shared<LocalBoxFuture<'static, Rc<AttributeBundle>>>;

pub type SharedDocument = SharedFetch<Rc<KmlDocument>, LoadError>;

/// What style resolution needs from its surroundings: documents named by
/// external `styleUrl`s, and somewhere to run work that must not block a frame.
pub trait StyleHost {
    fn load_document(&self, location: &str) -> SharedDocument;
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResolutionPhase {
    Unresolved,
    Resolving,
    Resolved,
}

#[derive(Default)]
enum SlotState {
    #[default]
    Unresolved,
    Resolving(SharedBundle),
    Resolved(Rc<AttributeBundle>),
}

/// Per-shape resolution state, stored on the element.
#[derive(Default)]
pub(crate) struct StyleSlot {
    state: SlotState,
    generation: u64,
    last_known: Option<Rc<AttributeBundle>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StyleError {
    #[error("style reference {url:?} names no element")]
    MissingFragment { url: String },
    #[error("no element with id {id:?} in {location}")]
    MissingId { id: String, location: String },
    #[error("id {id:?} is declared {count} times in {location}")]
    DuplicateId {
        id: String,
        location: String,
        count: usize,
    },
    #[error("<{tag}> {id:?} is not a Style or StyleMap")]
    NotAStyle { id: String, tag: String },
    #[error("StyleMap has no {state:?} pair")]
    MissingPair { state: StyleState },
    #[error("{state:?} pair has neither a Style nor a styleUrl")]
    EmptyPair { state: StyleState },
    #[error("StyleMap pair for {state:?} refers to another StyleMap")]
    NestedStyleMap { state: StyleState },
    #[error("failed to load style document {location}: {message}")]
    Load { location: String, message: String },
    #[error("fragment reference {url:?} from a shape outside any document")]
    Detached { url: String },
    #[error("session closed while resolving {url:?}")]
    SessionClosed { url: String },
}

/// A Style or StyleMap together with the document its references resolve
/// against.
struct Selected {
    document: Option<Rc<KmlDocument>>,
    element: Rc<Element>,
}

/// Drives the per-shape `Unresolved -> Resolving -> Resolved` state machine.
pub struct StyleResolver {
    host: Weak<dyn StyleHost>,
    /// Shapes whose resolution read a document fetched by location.
    dependents: RefCell<BTreeMap<String, Vec<Weak<Element>>>>,
}

impl StyleResolver {
    pub fn new(host: Weak<dyn StyleHost>) -> Rc<Self> {
        Rc::new(Self {
            host,
            dependents: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn phase(shape: &Element) -> ResolutionPhase {
        match shape.style.borrow().state {
            SlotState::Unresolved => ResolutionPhase::Unresolved,
            SlotState::Resolving(_) => ResolutionPhase::Resolving,
            SlotState::Resolved(_) => ResolutionPhase::Resolved,
        }
    }

    /// The shape's attribute bundle. Starts resolution on first use; callers
    /// arriving while it runs join the same future.
    pub fn styles(self: &Rc<Self>, shape: &Rc<Element>) -> SharedBundle {
        let (shared, started) = self.begin(shape);
        if started {
            self.drive(shared.clone());
        }
        shared
    }

    /// Non-blocking read for rendering: the resolved bundle, or the last good
    /// one while a re-resolution is running, or `None` if nothing is known yet.
    pub fn current_attributes(self: &Rc<Self>, shape: &Rc<Element>) -> Option<Rc<AttributeBundle>> {
        let (shared, started) = self.begin(shape);
        // Inline and same-document styles finish without suspending.
        if let Some(bundle) = shared.clone().now_or_never() {
            return Some(bundle);
        }
        if started {
            self.drive(shared);
        }
        shape.style.borrow().last_known.clone()
    }

    /// Forgets the resolved bundle; the next request resolves again. The last
    /// bundle stays available to [`StyleResolver::current_attributes`].
    pub fn invalidate(shape: &Element) {
        let mut slot = shape.style.borrow_mut();
        slot.generation += 1;
        slot.state = SlotState::Unresolved;
    }

    /// Invalidates every shape whose styles came from `location`.
    pub fn invalidate_dependents(&self, location: &str) -> usize {
        let shapes = self
            .dependents
            .borrow_mut()
            .remove(location)
            .unwrap_or_default();
        let mut count = 0;
        for shape in shapes.iter().filter_map(Weak::upgrade) {
            Self::invalidate(&shape);
            count += 1;
        }
        debug!(location, count, "invalidated dependent styles");
        count
    }

    fn begin(self: &Rc<Self>, shape: &Rc<Element>) -> (SharedBundle, bool) {
        let mut slot = shape.style.borrow_mut();
        match &slot.state {
            SlotState::Resolved(bundle) => (future::ready(Rc::clone(bundle)).boxed_local().shared(), false),
            SlotState::Resolving(pending) => (pending.clone(), false),
            SlotState::Unresolved => {
                let generation = slot.generation;
                let pending = Rc::clone(self)
                    .resolve(Rc::downgrade(shape), generation)
                    .boxed_local()
                    .shared();
                slot.state = SlotState::Resolving(pending.clone());
                (pending, true)
            }
        }
    }

    fn drive(&self, shared: SharedBundle) {
        if let Some(host) = self.host.upgrade() {
            host.spawn(shared.map(|_| ()).boxed_local());
        }
    }

    async fn resolve(self: Rc<Self>, shape: Weak<Element>, generation: u64) -> Rc<AttributeBundle> {
        let Some(shape) = shape.upgrade() else {
            return Rc::new(AttributeBundle::default());
        };

        let local = shape
            .create_child_element(Selector::Tag("Style"))
            .map(|style| StyleFields::from_style(&style))
            .unwrap_or_default();

        let (normal, highlighted) = match self.select(&shape).await {
            Ok(Some(selected)) => (
                self.fields_or_default(&shape, &selected, StyleState::Normal).await,
                self.fields_or_default(&shape, &selected, StyleState::Highlight).await,
            ),
            Ok(None) => (StyleFields::default(), StyleFields::default()),
            Err(e) => {
                report(&shape, &e);
                (StyleFields::default(), StyleFields::default())
            }
        };

        let bundle = Rc::new(AttributeBundle {
            normal: Attributes::from_fields(&local.merge_over(&normal)),
            highlighted: Attributes::from_fields(&local.merge_over(&highlighted)),
        });

        let mut slot = shape.style.borrow_mut();
        if slot.generation == generation {
            slot.state = SlotState::Resolved(Rc::clone(&bundle));
            slot.last_known = Some(Rc::clone(&bundle));
        }
        bundle
    }

    /// The shared selector of a shape: an inline StyleMap, else its styleUrl.
    async fn select(&self, shape: &Rc<Element>) -> Result<Option<Selected>, StyleError> {
        let document = shape.document();
        if let Some(map) = shape.create_child_element(Selector::Tag("StyleMap")) {
            return Ok(Some(Selected {
                document,
                element: map,
            }));
        }
        match shape.style_url() {
            Some(url) => self.lookup(document, &url, shape).await.map(Some),
            None => Ok(None),
        }
    }

    async fn fields_or_default(
        &self,
        shape: &Rc<Element>,
        selected: &Selected,
        state: StyleState,
    ) -> StyleFields {
        match self.fields_for_state(shape, selected, state).await {
            Ok(fields) => fields,
            Err(e) => {
                report(shape, &e);
                StyleFields::default()
            }
        }
    }

    async fn fields_for_state(
        &self,
        shape: &Rc<Element>,
        selected: &Selected,
        state: StyleState,
    ) -> Result<StyleFields, StyleError> {
        if selected.element.tag() == "Style" {
            return Ok(StyleFields::from_style(&selected.element));
        }

        let pair = style_map_pairs(&selected.element)
            .into_iter()
            .find(|p| p.key == state)
            .ok_or(StyleError::MissingPair { state })?;
        let target = match (pair.inline, pair.style_url) {
            (Some(inline), _) => inline,
            (None, Some(url)) => {
                self.lookup(selected.document.clone(), &url, shape)
                    .await?
                    .element
            }
            (None, None) => return Err(StyleError::EmptyPair { state }),
        };
        match target.tag() {
            "Style" => Ok(StyleFields::from_style(&target)),
            _ => Err(StyleError::NestedStyleMap { state }),
        }
    }

    /// Resolves `url` (`[path]#id`) relative to `base`, fetching the named
    /// document through the host when it is not `base` itself.
    async fn lookup(
        &self,
        base: Option<Rc<KmlDocument>>,
        url: &str,
        shape: &Rc<Element>,
    ) -> Result<Selected, StyleError> {
        let (path, fragment) = split_fragment(url);
        let id = fragment.ok_or_else(|| StyleError::MissingFragment {
            url: url.to_string(),
        })?;
        let path = path.trim();

        let document = match base {
            Some(doc) if path.is_empty() || doc.is_same_location(path) => doc,
            None if path.is_empty() => {
                return Err(StyleError::Detached {
                    url: url.to_string(),
                });
            }
            base => {
                let location = match &base {
                    Some(doc) => doc.resolve_href(path),
                    None => path.to_string(),
                };
                let pending = self
                    .host
                    .upgrade()
                    .ok_or_else(|| StyleError::SessionClosed {
                        url: url.to_string(),
                    })?
                    .load_document(&location);
                self.record_dependent(&location, shape);
                pending.await.map_err(|e| StyleError::Load {
                    location: location.clone(),
                    message: e.to_string(),
                })?
            }
        };

        let element = document.element_by_id(id)?;
        if element.kind() != ElementKind::StyleSelector {
            return Err(StyleError::NotAStyle {
                id: id.to_string(),
                tag: element.tag().to_string(),
            });
        }
        Ok(Selected {
            document: Some(document),
            element,
        })
    }

    fn record_dependent(&self, location: &str, shape: &Rc<Element>) {
        let weak = Rc::downgrade(shape);
        let mut dependents = self.dependents.borrow_mut();
        let list = dependents.entry(location.to_string()).or_default();
        if !list.iter().any(|w| w.ptr_eq(&weak)) {
            list.push(weak);
        }
    }
}

fn report(shape: &Element, error: &StyleError) {
    warn!(
        shape = %shape.tag(),
        id = shape.id().unwrap_or(""),
        style_url = shape.style_url().as_deref().unwrap_or(""),
        error = %error,
        "style unresolved, using defaults"
    );
    shape.warn("style-unresolved", error.to_string());
}

impl Element {
    pub fn style_phase(&self) -> ResolutionPhase {
        StyleResolver::phase(self)
    }

    pub fn is_style_resolved(&self) -> bool {
        self.style_phase() == ResolutionPhase::Resolved
    }
}

impl std::fmt::Debug for StyleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StyleResolver")
            .field("dependents", &self.dependents.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}
