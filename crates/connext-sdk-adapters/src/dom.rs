//! Small DOM helpers shared by the browser adapters.

use wasm_bindgen::JsCast;

use connext_sdk_core::PortError;

pub fn window() -> Result<web_sys::Window, PortError> {
    web_sys::window().ok_or_else(|| PortError::Transport("missing window".to_owned()))
}

pub fn document() -> Result<web_sys::Document, PortError> {
    window()?
        .document()
        .ok_or_else(|| PortError::Transport("missing document".to_owned()))
}

pub fn element_by_id(id: &str) -> Option<web_sys::Element> {
    document().ok()?.get_element_by_id(id)
}

/// Returns the element with `id`, creating it under `parent` (the body when
/// `None`) if it is not already in the page.
pub fn render_element(
    tag: &str,
    id: &str,
    parent: Option<&web_sys::Element>,
) -> Result<(web_sys::Element, bool), PortError> {
    if let Some(existing) = element_by_id(id) {
        return Ok((existing, false));
    }
    let doc = document()?;
    let element = doc
        .create_element(tag)
        .map_err(|e| PortError::Transport(format!("create <{tag}> failed: {e:?}")))?;
    element.set_id(id);
    let parent: web_sys::Element = match parent {
        Some(p) => p.clone(),
        None => doc
            .body()
            .ok_or_else(|| PortError::Transport("missing document body".to_owned()))?
            .unchecked_into(),
    };
    parent
        .append_child(&element)
        .map_err(|e| PortError::Transport(format!("append #{id} failed: {e:?}")))?;
    Ok((element, true))
}

pub fn remove_element(id: &str) {
    if let Some(element) = element_by_id(id) {
        element.remove();
    }
}

pub fn set_attr(element: &web_sys::Element, name: &str, value: &str) -> Result<(), PortError> {
    element
        .set_attribute(name, value)
        .map_err(|e| PortError::Transport(format!("set {name} failed: {e:?}")))
}
