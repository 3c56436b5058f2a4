//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存的配置结构和解析逻辑。

use crate::error::{FragmentError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub esi: EsiConfig,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub policies: Vec<FragmentPolicy>,
}

/// 全局配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 策略未指定超时时的默认超时（秒），小于等于0表示永不过期
    pub default_timeout: i64,
    /// 命中这些状态码的渲染结果不缓存
    pub filtered_status_codes: Vec<u16>,
    /// 异步渲染等待完成的期限（毫秒）
    pub async_timeout_ms: u64,
    /// 片段组合节点池大小
    pub pool_size: usize,
    /// 内存存储最大条目数
    pub store_capacity: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_timeout: 300,
            filtered_status_codes: vec![500, 502, 503, 504],
            async_timeout_ms: 30_000,
            pool_size: 64,
            store_capacity: 10_000,
        }
    }
}

/// 边缘缓存（ESI）配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct EsiConfig {
    /// 是否启用边缘委托
    pub enabled: bool,
    /// 声明边缘能力的请求头
    pub capability_header: String,
    /// 输出缓存指令的响应头
    pub directive_header: String,
    /// 边缘回源请求携带的标记参数
    pub marker_param: String,
    /// 包含占位符模板，`{src}` 会被替换为片段地址
    pub include_template: String,
    /// 片段无过期时间时使用的 max-age 上限（秒）
    pub max_age_ceiling: u64,
    /// 响应已有指令时是否覆盖
    pub force_directive: bool,
}

impl Default for EsiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capability_header: "Surrogate-Capability".to_string(),
            directive_header: "Surrogate-Control".to_string(),
            marker_param: "_esiurl".to_string(),
            include_template: "<esi:include src=\"{src}\"/>".to_string(),
            max_age_ceiling: 86_400,
            force_directive: false,
        }
    }
}

/// 外部缓存配置
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ExternalConfig {
    pub groups: Vec<ExternalGroupConfig>,
}

/// 外部缓存组配置
///
/// 每个组对应一组边缘节点，拥有独立的连接集合。
#[derive(Deserialize, Clone, Debug)]
pub struct ExternalGroupConfig {
    pub name: String,
    /// 边缘节点连接的监听地址
    #[serde(default)]
    pub listen: Option<String>,
}

impl ExternalConfig {
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }
}

/// 共享策略
///
/// 除 `NotShared` 外的策略都要求属性快照可以跨进程序列化。
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SharingPolicy {
    #[default]
    NotShared,
    Push,
    Pull,
    PushPull,
}

impl SharingPolicy {
    pub fn is_shared(&self) -> bool {
        !matches!(self, SharingPolicy::NotShared)
    }
}

/// 缓存键组件类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Parameter,
    Attribute,
    Session,
    Cookie,
    Header,
    PathInfo,
    ServletPath,
    Locale,
    RequestType,
}

impl ComponentKind {
    /// 该类型是否需要组件名称
    pub fn needs_id(&self) -> bool {
        matches!(
            self,
            ComponentKind::Parameter
                | ComponentKind::Attribute
                | ComponentKind::Session
                | ComponentKind::Cookie
                | ComponentKind::Header
        )
    }
}

/// 缓存键组件配置
#[derive(Deserialize, Clone, Debug)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default)]
    pub id: String,
    /// 属性值上的字段路径（JSON pointer 或字段名）
    #[serde(default)]
    pub method: Option<String>,
    /// 组件缺失时片段不缓存
    #[serde(default)]
    pub required: bool,
    /// 只把组件名称而非取值放入缓存键
    #[serde(default)]
    pub ignore_value: bool,
    /// 非空时取值必须在其中，否则片段不缓存
    #[serde(default)]
    pub values: Vec<String>,
    /// 取值命中其中任意一个时片段不缓存
    #[serde(default)]
    pub not_values: Vec<String>,
    /// 产生 `data_id=取值` 形式的次级失效标识
    #[serde(default)]
    pub data_id: Option<String>,
    /// 产生 `invalidate=取值` 形式的立即失效标识
    #[serde(default)]
    pub invalidate: Option<String>,
    /// 为 false 时组件只参与排除和失效判断，不进入缓存键
    #[serde(default = "default_true")]
    pub in_key: bool,
}

/// 单个路由的片段缓存策略
#[derive(Deserialize, Clone, Debug)]
pub struct FragmentPolicy {
    /// 策略名称，作为缓存键前缀和模板标识
    pub name: String,
    /// 策略适用的路径
    pub template: String,
    /// 渲染类名称，可用于子片段排除列表
    #[serde(default)]
    pub render_class: Option<String>,
    /// 超时（秒），小于等于0表示永不过期
    #[serde(default)]
    pub timeout: Option<i64>,
    /// 不活动超时（秒）
    #[serde(default)]
    pub inactivity: Option<u64>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub sharing: SharingPolicy,
    /// 是否允许委托给边缘缓存
    #[serde(default)]
    pub edge_cacheable: bool,
    /// 边缘回源使用的替代地址
    #[serde(default)]
    pub alternate_url: Option<String>,
    /// 外部缓存组名称
    #[serde(default)]
    pub external_cache: Option<String>,
    /// 是否内联子片段
    #[serde(default)]
    pub consume_subfragments: bool,
    /// 不内联的子片段（模板或渲染类名称）
    #[serde(default)]
    pub consume_exclude: Vec<String>,
    /// 本片段不被父片段内联
    #[serde(default)]
    pub do_not_consume: bool,
    #[serde(default = "default_true")]
    pub save_attributes: bool,
    #[serde(default)]
    pub attribute_exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub store_cookies: bool,
    #[serde(default)]
    pub cookie_exclude: Vec<String>,
    /// 不区分 GET 和 POST
    #[serde(default)]
    pub ignore_get_post: bool,
    /// 缓存键不包含字符编码
    #[serde(default)]
    pub ignore_char_encoding: bool,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u8 {
    1
}

impl FragmentPolicy {
    /// 创建只带名称和路径的策略，其余字段取默认值
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            render_class: None,
            timeout: None,
            inactivity: None,
            priority: default_priority(),
            sharing: SharingPolicy::NotShared,
            edge_cacheable: false,
            alternate_url: None,
            external_cache: None,
            consume_subfragments: false,
            consume_exclude: Vec::new(),
            do_not_consume: false,
            save_attributes: true,
            attribute_exclude: Vec::new(),
            store_cookies: true,
            cookie_exclude: Vec::new(),
            ignore_get_post: false,
            ignore_char_encoding: false,
            components: Vec::new(),
        }
    }

    /// 边缘回源地址，未配置替代地址时使用模板路径
    pub fn edge_url(&self) -> &str {
        self.alternate_url.as_deref().unwrap_or(&self.template)
    }

    /// 子片段是否在排除列表中
    pub fn excludes_child(&self, template: &str, render_class: Option<&str>) -> bool {
        self.consume_exclude
            .iter()
            .any(|e| e == template || Some(e.as_str()) == render_class)
    }
}

impl ComponentConfig {
    pub fn new(kind: ComponentKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            method: None,
            required: false,
            ignore_value: false,
            values: Vec::new(),
            not_values: Vec::new(),
            data_id: None,
            invalidate: None,
            in_key: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl Config {
    /// 从 TOML 文本解析配置并验证
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| FragmentError::Config(e.to_string()))?;
        config.validate().map_err(FragmentError::Config)?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.global.async_timeout_ms == 0 {
            return Err("Global async_timeout_ms cannot be zero".to_string());
        }

        if self.global.store_capacity == 0 {
            return Err("Global store_capacity cannot be zero".to_string());
        }

        if self.esi.enabled {
            if !self.esi.include_template.contains("{src}") {
                return Err("ESI include_template must contain {src}".to_string());
            }
            if self.esi.capability_header.is_empty() || self.esi.directive_header.is_empty() {
                return Err("ESI header names cannot be empty".to_string());
            }
            if self.esi.marker_param.is_empty() {
                return Err("ESI marker_param cannot be empty".to_string());
            }
        }

        let mut groups = HashSet::new();
        for group in &self.external.groups {
            if group.name.is_empty() || !groups.insert(group.name.as_str()) {
                return Err(format!(
                    "External cache group name '{}' is empty or duplicated",
                    group.name
                ));
            }
            if let Some(listen) = &group.listen {
                if listen.parse::<std::net::SocketAddr>().is_err() {
                    return Err(format!(
                        "External cache group '{}' has invalid listen address '{}'",
                        group.name, listen
                    ));
                }
            }
        }

        let mut names = HashSet::new();
        let mut templates = HashSet::new();
        for policy in &self.policies {
            if policy.name.is_empty() {
                return Err("Policy name cannot be empty".to_string());
            }
            if !names.insert(policy.name.as_str()) {
                return Err(format!("Duplicate policy name '{}'", policy.name));
            }
            if !templates.insert(policy.template.as_str()) {
                return Err(format!(
                    "Duplicate policy template '{}' in policy '{}'",
                    policy.template, policy.name
                ));
            }
            if policy.priority == 0 || policy.priority > 16 {
                return Err(format!(
                    "Policy '{}' priority must be between 1 and 16",
                    policy.name
                ));
            }
            if let Some(group) = &policy.external_cache {
                if !self.external.has_group(group) {
                    return Err(format!(
                        "Policy '{}' references unknown external cache group '{}'",
                        policy.name, group
                    ));
                }
            }
            for component in &policy.components {
                if component.kind.needs_id() && component.id.is_empty() {
                    return Err(format!(
                        "Policy '{}' has a {:?} component without id",
                        policy.name, component.kind
                    ));
                }
            }
        }

        Ok(())
    }
}
