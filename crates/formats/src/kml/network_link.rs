use std::rc::Rc;

use tracing::{debug, trace};

use crate::kml::element::{Element, Selector};
use crate::kml::fields::{self, FieldError};
use crate::kml::render::{RenderContext, ShapeCollector};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RefreshMode {
    #[default]
    OnChange,
    OnInterval,
    OnExpire,
}

impl RefreshMode {
    pub fn parse(text: &str) -> Result<Self, FieldError> {
        match text {
            "onChange" => Ok(RefreshMode::OnChange),
            "onInterval" => Ok(RefreshMode::OnInterval),
            "onExpire" => Ok(RefreshMode::OnExpire),
            other => Err(FieldError::Enum {
                expected: "onChange, onInterval or onExpire",
                found: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ViewRefreshMode {
    #[default]
    Never,
    OnStop,
    OnRequest,
    OnRegion,
}

impl ViewRefreshMode {
    pub fn parse(text: &str) -> Result<Self, FieldError> {
        match text {
            "never" => Ok(ViewRefreshMode::Never),
            "onStop" => Ok(ViewRefreshMode::OnStop),
            "onRequest" => Ok(ViewRefreshMode::OnRequest),
            "onRegion" => Ok(ViewRefreshMode::OnRegion),
            other => Err(FieldError::Enum {
                expected: "never, onStop, onRequest or onRegion",
                found: other.to_string(),
            }),
        }
    }
}

/// The `Link` (or legacy `Url`) of a `NetworkLink`, plus the link's own flags.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLink {
    pub href: Option<String>,
    pub refresh_mode: RefreshMode,
    /// `None` when the document leaves it to the session default.
    pub refresh_interval_s: Option<f64>,
    pub view_refresh_mode: ViewRefreshMode,
    pub view_refresh_time_s: Option<f64>,
    pub refresh_visibility: bool,
    pub fly_to_view: bool,
}

impl NetworkLink {
    pub fn from_element(element: &Rc<Element>) -> Self {
        let link = element.create_child_element(Selector::AnyTag(&["Link", "Url"]));
        let link = link.as_ref();
        Self {
            href: link.and_then(|l| l.retrieve("href", fields::string)),
            refresh_mode: link
                .and_then(|l| l.retrieve("refreshMode", RefreshMode::parse))
                .unwrap_or_default(),
            refresh_interval_s: link.and_then(|l| l.retrieve("refreshInterval", fields::number)),
            view_refresh_mode: link
                .and_then(|l| l.retrieve("viewRefreshMode", ViewRefreshMode::parse))
                .unwrap_or_default(),
            view_refresh_time_s: link.and_then(|l| l.retrieve("viewRefreshTime", fields::number)),
            refresh_visibility: element
                .retrieve("refreshVisibility", fields::boolean)
                .unwrap_or(false),
            fly_to_view: element.retrieve("flyToView", fields::boolean).unwrap_or(false),
        }
    }

    /// True for links the scheduler reloads on its own.
    pub fn is_timed(&self) -> bool {
        matches!(self.refresh_mode, RefreshMode::OnInterval | RefreshMode::OnExpire)
    }
}

/// Renders the document behind a `NetworkLink` element, if it is loaded.
pub(crate) fn render_link(element: &Rc<Element>, collector: &mut dyn ShapeCollector, ctx: &RenderContext<'_>) {
    let link = NetworkLink::from_element(element);
    let Some(href) = link.href.as_deref() else {
        element.malformed("NetworkLink without a Link href");
        return;
    };

    let location = match element.document() {
        Some(doc) => doc.resolve_href(href),
        None => href.to_string(),
    };

    if ctx.depth >= ctx.host.max_link_depth() {
        trace!(location = %location, depth = ctx.depth, "network link depth exhausted");
        element.warn("link-depth", format!("not following {location}: link depth {} reached", ctx.depth));
        return;
    }
    if ctx.is_rendering(&location) {
        element.warn("link-cycle", format!("not following {location}: already being rendered"));
        return;
    }

    let Some(linked) = ctx.host.linked_document(&link, &location) else {
        debug!(location = %location, "linked document not loaded yet");
        return;
    };
    linked.render(collector, &ctx.nested(linked.location()));
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::{NetworkLink, RefreshMode, ViewRefreshMode};
    use crate::kml::document::KmlDocument;
    use crate::kml::registry::ElementRegistry;

    fn link(text: &str) -> NetworkLink {
        let doc = KmlDocument::parse("root.kml", text, Rc::new(ElementRegistry::kml())).unwrap();
        NetworkLink::from_element(&doc.shapes()[0])
    }

    #[test]
    fn reads_link_fields() {
        let link = link(
            "<NetworkLink><refreshVisibility>1</refreshVisibility>\
               <Link><href>live.kml</href><refreshMode>onInterval</refreshMode>\
               <refreshInterval>30</refreshInterval><viewRefreshMode>onStop</viewRefreshMode></Link>\
             </NetworkLink>",
        );
        assert_eq!(
            link,
            NetworkLink {
                href: Some("live.kml".to_string()),
                refresh_mode: RefreshMode::OnInterval,
                refresh_interval_s: Some(30.0),
                view_refresh_mode: ViewRefreshMode::OnStop,
                view_refresh_time_s: None,
                refresh_visibility: true,
                fly_to_view: false,
            }
        );
        assert!(link.is_timed());
    }

    #[test]
    fn accepts_legacy_url_and_defaults() {
        let link = link("<NetworkLink><Url><href>old.kml</href></Url></NetworkLink>");
        assert_eq!(link.href.as_deref(), Some("old.kml"));
        assert_eq!(link.refresh_mode, RefreshMode::OnChange);
        assert_eq!(link.view_refresh_mode, ViewRefreshMode::Never);
        assert!(!link.is_timed());
    }

    #[test]
    fn bad_refresh_mode_is_a_diagnostic() {
        let doc = KmlDocument::parse(
            "root.kml",
            "<NetworkLink><Link><href>a.kml</href><refreshMode>sometimes</refreshMode></Link></NetworkLink>",
            Rc::new(ElementRegistry::kml()),
        )
        .unwrap();
        let link = NetworkLink::from_element(&doc.shapes()[0]);
        assert_eq!(link.refresh_mode, RefreshMode::OnChange);
        assert_eq!(doc.context().diagnostic_count("malformed-field"), 1);
    }
}
