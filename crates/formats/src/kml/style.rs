use std::rc::Rc;

use crate::kml::element::{Element, Selector};
use crate::kml::fields::{self, FieldError};

/// Field-by-field override: set fields of `self` win, unset ones fall
/// through to `shared`.
pub trait Merge {
    fn merge_over(&self, shared: &Self) -> Self;
}

impl<T: Merge + Clone> Merge for Option<T> {
    fn merge_over(&self, shared: &Self) -> Self {
        match (self, shared) {
            (Some(local), Some(shared)) => Some(local.merge_over(shared)),
            (Some(local), None) => Some(local.clone()),
            (None, shared) => shared.clone(),
        }
    }
}

macro_rules! merge_fields {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl Merge for $ty {
            fn merge_over(&self, shared: &Self) -> Self {
                Self {
                    $($field: self.$field.clone().or_else(|| shared.$field.clone()),)*
                }
            }
        }
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColorMode {
    Normal,
    Random,
}

fn color_mode(text: &str) -> Result<ColorMode, FieldError> {
    match text {
        "normal" => Ok(ColorMode::Normal),
        "random" => Ok(ColorMode::Random),
        _ => Err(FieldError::Enum {
            expected: "colorMode",
            found: text.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineStyle {
    pub color: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub width: Option<f64>,
    pub outer_color: Option<String>,
    pub outer_width: Option<f64>,
    pub physical_width: Option<f64>,
    pub label_visibility: Option<bool>,
}

merge_fields!(LineStyle {
    color,
    color_mode,
    width,
    outer_color,
    outer_width,
    physical_width,
    label_visibility,
});

impl LineStyle {
    pub fn from_element(e: &Element) -> Self {
        Self {
            color: e.retrieve("color", fields::color),
            color_mode: e.retrieve("colorMode", color_mode),
            width: e.retrieve("width", fields::number),
            outer_color: e.retrieve("gx:outerColor", fields::color),
            outer_width: e.retrieve("gx:outerWidth", fields::number),
            physical_width: e.retrieve("gx:physicalWidth", fields::number),
            label_visibility: e.retrieve("gx:labelVisibility", fields::boolean),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolyStyle {
    pub color: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub fill: Option<bool>,
    pub outline: Option<bool>,
}

merge_fields!(PolyStyle {
    color,
    color_mode,
    fill,
    outline
});

impl PolyStyle {
    pub fn from_element(e: &Element) -> Self {
        Self {
            color: e.retrieve("color", fields::color),
            color_mode: e.retrieve("colorMode", color_mode),
            fill: e.retrieve("fill", fields::boolean),
            outline: e.retrieve("outline", fields::boolean),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Units {
    Fraction,
    Pixels,
    InsetPixels,
}

impl Units {
    fn parse(text: Option<&str>) -> Units {
        match text {
            Some("pixels") => Units::Pixels,
            Some("insetPixels") => Units::InsetPixels,
            _ => Units::Fraction,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HotSpot {
    pub x: f64,
    pub y: f64,
    pub xunits: Units,
    pub yunits: Units,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IconStyle {
    pub color: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub scale: Option<f64>,
    pub heading: Option<f64>,
    pub href: Option<String>,
    pub hot_spot: Option<HotSpot>,
}

merge_fields!(IconStyle {
    color,
    color_mode,
    scale,
    heading,
    href,
    hot_spot
});

impl IconStyle {
    pub fn from_element(e: &Rc<Element>) -> Self {
        let href = e
            .create_child_element(Selector::Tag("Icon"))
            .and_then(|icon| icon.retrieve("href", fields::string));
        let hot_spot = e.node().child("hotSpot").map(|node| {
            let coord = |name: &str| match node.attribute(name).map(str::trim) {
                None | Some("") => 0.5,
                Some(text) => fields::number(text).unwrap_or_else(|err| {
                    e.malformed(format!("hotSpot {name}: {err}"));
                    0.5
                }),
            };
            HotSpot {
                x: coord("x"),
                y: coord("y"),
                xunits: Units::parse(node.attribute("xunits")),
                yunits: Units::parse(node.attribute("yunits")),
            }
        });
        Self {
            color: e.retrieve("color", fields::color),
            color_mode: e.retrieve("colorMode", color_mode),
            scale: e.retrieve("scale", fields::number),
            heading: e.retrieve("heading", fields::number),
            href,
            hot_spot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelStyle {
    pub color: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub scale: Option<f64>,
}

merge_fields!(LabelStyle {
    color,
    color_mode,
    scale
});

impl LabelStyle {
    pub fn from_element(e: &Element) -> Self {
        Self {
            color: e.retrieve("color", fields::color),
            color_mode: e.retrieve("colorMode", color_mode),
            scale: e.retrieve("scale", fields::number),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Default,
    Hide,
}

fn display_mode(text: &str) -> Result<DisplayMode, FieldError> {
    match text {
        "default" => Ok(DisplayMode::Default),
        "hide" => Ok(DisplayMode::Hide),
        _ => Err(FieldError::Enum {
            expected: "displayMode",
            found: text.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BalloonStyle {
    pub bg_color: Option<String>,
    pub text_color: Option<String>,
    pub text: Option<String>,
    pub display_mode: Option<DisplayMode>,
}

merge_fields!(BalloonStyle {
    bg_color,
    text_color,
    text,
    display_mode
});

impl BalloonStyle {
    pub fn from_element(e: &Element) -> Self {
        Self {
            // `color` is the KML 2.0 spelling of bgColor.
            bg_color: e
                .retrieve("bgColor", fields::color)
                .or_else(|| e.retrieve("color", fields::color)),
            text_color: e.retrieve("textColor", fields::color),
            text: e.retrieve("text", fields::string),
            display_mode: e.retrieve("displayMode", display_mode),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ListItemType {
    Check,
    RadioFolder,
    CheckOffOnly,
    CheckHideChildren,
}

fn list_item_type(text: &str) -> Result<ListItemType, FieldError> {
    match text {
        "check" => Ok(ListItemType::Check),
        "radioFolder" => Ok(ListItemType::RadioFolder),
        "checkOffOnly" => Ok(ListItemType::CheckOffOnly),
        "checkHideChildren" => Ok(ListItemType::CheckHideChildren),
        _ => Err(FieldError::Enum {
            expected: "listItemType",
            found: text.to_string(),
        }),
    }
}

/// List icon for one open/closed/error/fetching state combination. Both
/// fields keep the authored text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemIcon {
    pub state: Option<String>,
    pub href: Option<String>,
}

impl ItemIcon {
    pub fn from_element(e: &Element) -> Self {
        Self {
            state: e.retrieve("state", fields::string),
            href: e.retrieve("href", fields::string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListStyle {
    pub list_item_type: Option<ListItemType>,
    pub bg_color: Option<String>,
    pub item_icons: Vec<ItemIcon>,
    pub max_snippet_lines: Option<i64>,
}

impl Merge for ListStyle {
    fn merge_over(&self, shared: &Self) -> Self {
        Self {
            list_item_type: self.list_item_type.or(shared.list_item_type),
            bg_color: self.bg_color.clone().or_else(|| shared.bg_color.clone()),
            item_icons: if self.item_icons.is_empty() {
                shared.item_icons.clone()
            } else {
                self.item_icons.clone()
            },
            max_snippet_lines: self.max_snippet_lines.or(shared.max_snippet_lines),
        }
    }
}

impl ListStyle {
    pub fn from_element(e: &Rc<Element>) -> Self {
        Self {
            list_item_type: e.retrieve("listItemType", list_item_type),
            bg_color: e.retrieve("bgColor", fields::color),
            item_icons: e
                .children_matching(Selector::Tag("ItemIcon"))
                .map(|icon| ItemIcon::from_element(icon))
                .collect(),
            max_snippet_lines: e.retrieve("maxSnippetLines", fields::integer),
        }
    }
}

/// The sub-styles of one `Style`, each absent unless authored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyleFields {
    pub line: Option<LineStyle>,
    pub poly: Option<PolyStyle>,
    pub icon: Option<IconStyle>,
    pub label: Option<LabelStyle>,
    pub balloon: Option<BalloonStyle>,
    pub list: Option<ListStyle>,
}

impl Merge for StyleFields {
    fn merge_over(&self, shared: &Self) -> Self {
        Self {
            line: self.line.merge_over(&shared.line),
            poly: self.poly.merge_over(&shared.poly),
            icon: self.icon.merge_over(&shared.icon),
            label: self.label.merge_over(&shared.label),
            balloon: self.balloon.merge_over(&shared.balloon),
            list: self.list.merge_over(&shared.list),
        }
    }
}

impl StyleFields {
    /// Reads the sub-styles of a `Style` element. A repeated sub-style
    /// overrides the earlier one field by field.
    pub fn from_style(style: &Rc<Element>) -> Self {
        let mut out = StyleFields::default();
        for child in style.children() {
            match child.tag() {
                "LineStyle" => merge_into(&mut out.line, LineStyle::from_element(child)),
                "PolyStyle" => merge_into(&mut out.poly, PolyStyle::from_element(child)),
                "IconStyle" => merge_into(&mut out.icon, IconStyle::from_element(child)),
                "LabelStyle" => merge_into(&mut out.label, LabelStyle::from_element(child)),
                "BalloonStyle" => merge_into(&mut out.balloon, BalloonStyle::from_element(child)),
                "ListStyle" => merge_into(&mut out.list, ListStyle::from_element(child)),
                _ => {}
            }
        }
        out
    }
}

fn merge_into<T: Merge + Clone>(slot: &mut Option<T>, value: T) {
    *slot = Some(match slot.take() {
        Some(earlier) => value.merge_over(&earlier),
        None => value,
    });
}

/// Which half of an attribute bundle a `StyleMap` pair feeds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StyleState {
    Normal,
    Highlight,
}

impl StyleState {
    pub fn parse(key: &str) -> Option<StyleState> {
        match key {
            "normal" => Some(StyleState::Normal),
            "highlight" | "highlighted" => Some(StyleState::Highlight),
            _ => None,
        }
    }
}

/// One `Pair` of a `StyleMap`.
#[derive(Debug, Clone)]
pub struct StyleMapPair {
    pub key: StyleState,
    pub style_url: Option<String>,
    pub inline: Option<Rc<Element>>,
}

/// Pairs of a `StyleMap` in source order. Pairs with an unknown key are
/// skipped with a diagnostic.
pub fn style_map_pairs(style_map: &Rc<Element>) -> Vec<StyleMapPair> {
    let mut pairs = Vec::new();
    for pair in style_map.children_matching(Selector::Tag("Pair")) {
        let key = pair.retrieve("key", fields::string).unwrap_or_default();
        let Some(key) = StyleState::parse(&key) else {
            pair.malformed(format!("unknown StyleMap pair key {key:?}"));
            continue;
        };
        pairs.push(StyleMapPair {
            key,
            style_url: pair.style_url(),
            inline: pair.create_child_element(Selector::AnyTag(&["Style", "StyleMap"])),
        });
    }
    pairs
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeAttributes {
    pub outline_color: String,
    pub outline_width: f64,
    pub outline_color_mode: ColorMode,
    pub outer_color: Option<String>,
    pub outer_width: f64,
    pub physical_width: Option<f64>,
    pub interior_color: String,
    pub interior_color_mode: ColorMode,
    pub draw_outline: bool,
    pub draw_interior: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextAttributes {
    pub color: String,
    pub scale: f64,
    pub line_labels: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IconAttributes {
    pub href: Option<String>,
    pub color: String,
    pub scale: f64,
    pub heading: f64,
    pub hot_spot: Option<HotSpot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalloonAttributes {
    pub bg_color: String,
    pub text_color: String,
    pub text: Option<String>,
    pub display_mode: DisplayMode,
}

const WHITE: &str = "ffffffff";
const BLACK: &str = "ff000000";

/// Concrete rendering attributes: every field has a value, taken from the
/// style where authored and from the KML defaults otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributes {
    pub shape: ShapeAttributes,
    pub text: TextAttributes,
    pub icon: IconAttributes,
    pub balloon: BalloonAttributes,
}

impl Attributes {
    pub fn from_fields(fields: &StyleFields) -> Self {
        let line = fields.line.clone().unwrap_or_default();
        let poly = fields.poly.clone().unwrap_or_default();
        let icon = fields.icon.clone().unwrap_or_default();
        let label = fields.label.clone().unwrap_or_default();
        let balloon = fields.balloon.clone().unwrap_or_default();

        Self {
            shape: ShapeAttributes {
                outline_color: line.color.unwrap_or_else(|| WHITE.to_string()),
                outline_width: line.width.unwrap_or(1.0),
                outline_color_mode: line.color_mode.unwrap_or(ColorMode::Normal),
                outer_color: line.outer_color,
                outer_width: line.outer_width.unwrap_or(0.0),
                physical_width: line.physical_width,
                interior_color: poly.color.unwrap_or_else(|| WHITE.to_string()),
                interior_color_mode: poly.color_mode.unwrap_or(ColorMode::Normal),
                draw_outline: poly.outline.unwrap_or(true),
                draw_interior: poly.fill.unwrap_or(true),
            },
            text: TextAttributes {
                color: label.color.unwrap_or_else(|| WHITE.to_string()),
                scale: label.scale.unwrap_or(1.0),
                line_labels: line.label_visibility.unwrap_or(false),
            },
            icon: IconAttributes {
                href: icon.href,
                color: icon.color.unwrap_or_else(|| WHITE.to_string()),
                scale: icon.scale.unwrap_or(1.0),
                heading: icon.heading.unwrap_or(0.0),
                hot_spot: icon.hot_spot,
            },
            balloon: BalloonAttributes {
                bg_color: balloon.bg_color.unwrap_or_else(|| WHITE.to_string()),
                text_color: balloon.text_color.unwrap_or_else(|| BLACK.to_string()),
                text: balloon.text,
                display_mode: balloon.display_mode.unwrap_or_default(),
            },
        }
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self::from_fields(&StyleFields::default())
    }
}

/// Terminal output of style resolution for one shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeBundle {
    pub normal: Attributes,
    pub highlighted: Attributes,
}

impl AttributeBundle {
    pub fn uniform(attributes: Attributes) -> Self {
        Self {
            normal: attributes.clone(),
            highlighted: attributes,
        }
    }

    pub fn get(&self, state: StyleState) -> &Attributes {
        match state {
            StyleState::Normal => &self.normal,
            StyleState::Highlight => &self.highlighted,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::{
        Attributes, ItemIcon, LineStyle, Merge, StyleFields, StyleState, Units, style_map_pairs,
    };
    use crate::kml::element::{Element, ElementInit, ParseContext};
    use crate::kml::registry::ElementRegistry;
    use crate::kml::xml::XmlNode;

    fn element(text: &str) -> Rc<Element> {
        let registry = Rc::new(ElementRegistry::kml());
        let node = XmlNode::parse(text).unwrap();
        let constructor = *registry.lookup(node.tag()).unwrap();
        constructor
            .construct(ElementInit::root(node, ParseContext::new(registry)))
            .unwrap()
    }

    #[test]
    fn item_icon_keeps_state_and_href() {
        let style = element(
            "<Style><ListStyle><ItemIcon><state>open</state><href>validUrl</href></ItemIcon></ListStyle></Style>",
        );
        let fields = StyleFields::from_style(&style);
        assert_eq!(
            fields.list.unwrap().item_icons,
            vec![ItemIcon {
                state: Some("open".to_string()),
                href: Some("validUrl".to_string())
            }]
        );
    }

    #[test]
    fn local_fields_override_shared_fields_one_by_one() {
        let shared = LineStyle {
            color: Some("ff0000ff".to_string()),
            width: Some(4.0),
            ..LineStyle::default()
        };
        let local = LineStyle {
            color: Some("ff00ff00".to_string()),
            ..LineStyle::default()
        };
        let merged = local.merge_over(&shared);
        assert_eq!(merged.color.as_deref(), Some("ff00ff00"));
        assert_eq!(merged.width, Some(4.0));
    }

    #[test]
    fn whole_sub_styles_fall_through() {
        let shared = StyleFields {
            line: Some(LineStyle {
                width: Some(2.0),
                ..LineStyle::default()
            }),
            ..StyleFields::default()
        };
        let merged = StyleFields::default().merge_over(&shared);
        assert_eq!(merged.line.unwrap().width, Some(2.0));
    }

    #[test]
    fn reads_icon_style_with_hot_spot() {
        let style = element(
            "<Style><IconStyle><scale>1.5</scale><Icon><href>pin.png</href></Icon>\
             <hotSpot x='20' y='2' xunits='pixels' yunits='pixels'/></IconStyle></Style>",
        );
        let icon = StyleFields::from_style(&style).icon.unwrap();
        assert_eq!(icon.scale, Some(1.5));
        assert_eq!(icon.href.as_deref(), Some("pin.png"));
        let hot_spot = icon.hot_spot.unwrap();
        assert_eq!((hot_spot.x, hot_spot.xunits), (20.0, Units::Pixels));
    }

    #[test]
    fn malformed_hot_spot_is_reported() {
        let style = element("<Style><IconStyle><hotSpot x='left' y='2'/></IconStyle></Style>");
        let hot_spot = StyleFields::from_style(&style).icon.unwrap().hot_spot.unwrap();
        assert_eq!((hot_spot.x, hot_spot.y), (0.5, 2.0));
        assert_eq!((hot_spot.xunits, hot_spot.yunits), (Units::Fraction, Units::Fraction));
        assert_eq!(style.context().diagnostic_count("malformed-field"), 1);
    }

    #[test]
    fn attributes_fill_in_defaults() {
        let style = element("<Style><PolyStyle><fill>0</fill></PolyStyle></Style>");
        let attrs = Attributes::from_fields(&StyleFields::from_style(&style));
        assert!(!attrs.shape.draw_interior);
        assert!(attrs.shape.draw_outline);
        assert_eq!(attrs.shape.outline_width, 1.0);
        assert_eq!(attrs.balloon.text_color, "ff000000");
        assert_eq!(Attributes::default().icon.scale, 1.0);
    }

    #[test]
    fn style_map_pairs_accept_both_highlight_spellings() {
        let map = element(
            "<StyleMap><Pair><key>normal</key><styleUrl>#a</styleUrl></Pair>\
             <Pair><key>highlighted</key><Style><LineStyle><width>3</width></LineStyle></Style></Pair>\
             <Pair><key>hover</key><styleUrl>#c</styleUrl></Pair></StyleMap>",
        );
        let pairs = style_map_pairs(&map);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].key, StyleState::Normal);
        assert_eq!(pairs[0].style_url.as_deref(), Some("#a"));
        assert_eq!(pairs[1].key, StyleState::Highlight);
        assert_eq!(pairs[1].inline.as_ref().unwrap().tag(), "Style");
        assert_eq!(map.context().diagnostic_count("malformed-field"), 1);
    }
}
