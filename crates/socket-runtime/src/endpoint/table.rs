use std::sync::Arc;

use socketry_core::PathParams;
use tracing::{info, warn};

use super::EndpointDescriptor;
use crate::error::{Result, RuntimeError};

/// 启动期构建的端点注册表。
#[derive(Debug, Default)]
pub struct EndpointTable {
    endpoints: Vec<Arc<EndpointDescriptor>>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EndpointDescriptor) -> Result<Arc<EndpointDescriptor>> {
        if let Some(existing) = self
            .endpoints
            .iter()
            .find(|endpoint| endpoint.template().same_shape(descriptor.template()))
        {
            warn!(
                path = descriptor.path(),
                existing = existing.path(),
                "endpoint overlaps an existing one"
            );
            return Err(RuntimeError::DuplicateEndpoint(descriptor.path().to_string()));
        }

        info!(
            path = descriptor.path(),
            execution_mode = ?descriptor.execution_mode(),
            "registering endpoint"
        );
        let descriptor = Arc::new(descriptor);
        self.endpoints.push(Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn get(&self, template: &str) -> Option<&Arc<EndpointDescriptor>> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.path() == template)
    }

    /// 判断该描述是否来自本表。
    pub fn contains(&self, descriptor: &Arc<EndpointDescriptor>) -> bool {
        self.endpoints
            .iter()
            .any(|endpoint| Arc::ptr_eq(endpoint, descriptor))
    }

    /// 按请求路径查找端点；字面量段越多越优先，同等时先注册者优先。
    pub fn resolve(&self, path: &str) -> Result<(Arc<EndpointDescriptor>, PathParams)> {
        let mut best: Option<(&Arc<EndpointDescriptor>, PathParams)> = None;
        for endpoint in &self.endpoints {
            let Some(params) = endpoint.template().matches(path) else {
                continue;
            };
            let better = best.as_ref().is_none_or(|(current, _)| {
                endpoint.template().specificity() > current.template().specificity()
            });
            if better {
                best = Some((endpoint, params));
            }
        }

        best.map(|(endpoint, params)| (Arc::clone(endpoint), params))
            .ok_or_else(|| RuntimeError::EndpointNotFound(path.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EndpointDescriptor>> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
