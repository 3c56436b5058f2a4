//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存键组件的取值逻辑。

use crate::config::{ComponentConfig, ComponentKind};
use crate::error::{FragmentError, Result};
use crate::http::{AttributeMap, AttributeValue, RequestView};
use serde_json::Value;

/// 组件在缓存键中的标签
pub(crate) fn label(component: &ComponentConfig) -> &str {
    if !component.id.is_empty() {
        return &component.id;
    }
    match component.kind {
        ComponentKind::PathInfo => "pathInfo",
        ComponentKind::ServletPath => "servletPath",
        ComponentKind::Locale => "locale",
        ComponentKind::RequestType => "requestType",
        _ => "",
    }
}

/// 读取组件取值
///
/// # 返回值
///
/// 组件不存在时返回 `Ok(None)`；取值过程本身失败（例如属性不可读、
/// 字段路径作用在非对象上）时返回 [`FragmentError::KeyResolution`]。
pub(crate) fn evaluate(
    component: &ComponentConfig,
    view: &dyn RequestView,
    attrs: &AttributeMap,
) -> Result<Option<String>> {
    let value = match component.kind {
        ComponentKind::Parameter => view
            .parameter_values(&component.id)
            .filter(|values| !values.is_empty())
            .map(|values| values.join(",")),
        ComponentKind::Attribute => match attrs.get(&component.id) {
            None => None,
            Some(AttributeValue::Json(v)) => select(component, v)?,
            Some(AttributeValue::Opaque(_)) => {
                return Err(FragmentError::KeyResolution(format!(
                    "attribute '{}' is not readable as a key value",
                    component.id
                )))
            }
        },
        ComponentKind::Session => match view.session_attribute(&component.id) {
            None => None,
            Some(v) => select(component, v)?,
        },
        ComponentKind::Cookie => view.cookie(&component.id).map(str::to_string),
        ComponentKind::Header => view.header(&component.id).map(str::to_string),
        ComponentKind::PathInfo => view.path_info().map(str::to_string),
        ComponentKind::ServletPath => Some(view.servlet_path().to_string()),
        ComponentKind::Locale => view.locale().map(str::to_string),
        ComponentKind::RequestType => Some(view.method().to_string()),
    };
    Ok(value.filter(|v| !v.is_empty()))
}

/// 在属性值上应用字段路径
///
/// `/` 开头的路径按 JSON pointer 解析，否则视为对象字段名。
fn select(component: &ComponentConfig, value: &Value) -> Result<Option<String>> {
    let selected = match component.method.as_deref() {
        None => Some(value),
        Some(pointer) if pointer.starts_with('/') => value.pointer(pointer),
        Some(field) => match value {
            Value::Object(map) => map.get(field),
            other => {
                return Err(FragmentError::KeyResolution(format!(
                    "method '{}' of '{}' applied to non-object value {}",
                    field, component.id, other
                )))
            }
        },
    };
    Ok(selected.and_then(render))
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
