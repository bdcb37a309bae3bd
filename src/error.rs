use crate::render::stages::{FogResource, PassStage};

/// 体积雾功能的致命配置错误
/// Fatal configuration errors of the volumetric fog feature
///
/// These are never retried. A missing or unloadable shader means the feature cannot
/// build its pipelines at all, so the error is surfaced immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FogFeatureError {
    /// 着色器资源路径无效
    /// The shader asset path is empty or not a WGSL file
    InvalidShaderPath { name: &'static str, path: String },
    /// 着色器加载失败
    /// The asset server reported a failed load for a required shader
    ShaderLoadFailed { name: &'static str, path: String },
}

impl std::fmt::Display for FogFeatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FogFeatureError::InvalidShaderPath { name, path } => {
                write!(f, "Invalid {name} shader path: {path:?}")
            }
            FogFeatureError::ShaderLoadFailed { name, path } => {
                write!(f, "Failed to load {name} shader from {path:?}")
            }
        }
    }
}

impl std::error::Error for FogFeatureError {}

/// 帧计划校验错误
/// Errors found while validating a fog frame plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FogPlanError {
    /// 阶段读取了尚未被写入的资源
    /// A stage reads a resource that no earlier stage produced
    ReadBeforeWrite {
        stage: PassStage,
        resource: FogResource,
    },
    /// 独占资源被其他阶段写入
    /// A resource held exclusively by one stage is written by another
    ExclusiveConflict {
        stage: PassStage,
        resource: FogResource,
    },
    /// 阶段顺序错误
    /// Stages are not declared in pipeline order
    OutOfOrder { stage: PassStage },
    /// 绘制操作不属于已声明的阶段
    /// A blit belongs to a stage that was not declared
    UndeclaredBlit { stage: PassStage },
}

impl std::fmt::Display for FogPlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FogPlanError::ReadBeforeWrite { stage, resource } => {
                write!(f, "{stage:?} reads {resource:?} before it is written")
            }
            FogPlanError::ExclusiveConflict { stage, resource } => {
                write!(
                    f,
                    "{stage:?} writes {resource:?} which is held exclusively by another stage"
                )
            }
            FogPlanError::OutOfOrder { stage } => {
                write!(f, "{stage:?} is declared out of pipeline order")
            }
            FogPlanError::UndeclaredBlit { stage } => {
                write!(f, "Blit scheduled for undeclared stage {stage:?}")
            }
        }
    }
}

impl std::error::Error for FogPlanError {}

/// 雾效配置文件读写错误
/// Fog profile (de)serialization errors
#[cfg(feature = "format-json")]
#[derive(Debug)]
pub enum FogProfileError {
    SerializationFailed(String),
    DeserializationFailed(String),
}

#[cfg(feature = "format-json")]
impl std::fmt::Display for FogProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FogProfileError::SerializationFailed(msg) => {
                write!(f, "Serialization failed: {msg}")
            }
            FogProfileError::DeserializationFailed(msg) => {
                write!(f, "Deserialization failed: {msg}")
            }
        }
    }
}

#[cfg(feature = "format-json")]
impl std::error::Error for FogProfileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_error_message_names_shader() {
        let err = FogFeatureError::ShaderLoadFailed {
            name: "volumetric fog",
            path: "shaders/volumetric_fog.wgsl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("volumetric fog"));
        assert!(msg.contains("shaders/volumetric_fog.wgsl"));
    }

    #[test]
    fn test_plan_error_message() {
        let err = FogPlanError::ReadBeforeWrite {
            stage: PassStage::FogRender,
            resource: FogResource::DownsampledDepth,
        };
        assert_eq!(
            err.to_string(),
            "FogRender reads DownsampledDepth before it is written"
        );
    }
}
