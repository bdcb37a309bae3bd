//! Stage declarations of the fog pipeline.
//! 雾效管线的阶段声明
//!
//! Every frame the pipeline is written down as data before anything is recorded: which
//! stages run, what each reads and writes, and the exact sequence of full-screen blits.
//! The plan is validated once and the graph node then executes exactly those blits.
//!
//! ```text
//! DownsampleDepth   CameraDepth                                 → DownsampledDepth
//! FogRender         DownsampledDepth [+ shadow maps]            → Fog
//! Blur (exclusive)  Fog ⇄ Blur  × blur_iterations
//! UpsampleComposite CameraDepth, DownsampledDepth, Fog, Color   → Composite (new camera color)
//! ```

use bevy::prelude::*;

use crate::error::FogPlanError;

/// 管线阶段
/// Dispatch tag of one scheduled unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassStage {
    DownsampleDepth,
    FogRender,
    Blur,
    UpsampleComposite,
}

/// 管线读写的资源
/// Resources read or written by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FogResource {
    CameraDepth,
    CameraColor,
    MainLightShadowMap,
    AdditionalLightsShadowMap,
    DownsampledDepth,
    Fog,
    Blur,
    Composite,
}

impl FogResource {
    /// Produced outside the fog pipeline.
    pub fn is_external(self) -> bool {
        matches!(
            self,
            FogResource::CameraDepth
                | FogResource::CameraColor
                | FogResource::MainLightShadowMap
                | FogResource::AdditionalLightsShadowMap
        )
    }
}

/// 单次全屏绘制使用的着色器入口
/// Full-screen pass kinds, one per fragment entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FogPass {
    DownsampleDepth,
    Render,
    HorizontalBlur,
    VerticalBlur,
    UpsampleComposite,
}

impl FogPass {
    pub const ALL: [FogPass; 5] = [
        FogPass::DownsampleDepth,
        FogPass::Render,
        FogPass::HorizontalBlur,
        FogPass::VerticalBlur,
        FogPass::UpsampleComposite,
    ];

    pub fn stage(self) -> PassStage {
        match self {
            FogPass::DownsampleDepth => PassStage::DownsampleDepth,
            FogPass::Render => PassStage::FogRender,
            FogPass::HorizontalBlur | FogPass::VerticalBlur => PassStage::Blur,
            FogPass::UpsampleComposite => PassStage::UpsampleComposite,
        }
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            FogPass::DownsampleDepth => "downsample_depth",
            FogPass::Render => "fog_render",
            FogPass::HorizontalBlur => "horizontal_blur",
            FogPass::VerticalBlur => "vertical_blur",
            FogPass::UpsampleComposite => "upsample_composite",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FogPass::DownsampleDepth => "volumetric_fog_downsample_depth_pass",
            FogPass::Render => "volumetric_fog_render_pass",
            FogPass::HorizontalBlur => "volumetric_fog_horizontal_blur_pass",
            FogPass::VerticalBlur => "volumetric_fog_vertical_blur_pass",
            FogPass::UpsampleComposite => "volumetric_fog_upsample_composite_pass",
        }
    }
}

/// 阶段的读写声明
/// Read/write intents of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDeclaration {
    pub stage: PassStage,
    pub reads: Vec<FogResource>,
    pub writes: Vec<FogResource>,
    /// 独占访问, 整个阶段期间其他阶段不得触碰这些资源
    /// The stage holds its resources for its whole duration
    pub exclusive: bool,
}

/// 一次全屏绘制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blit {
    pub pass: FogPass,
    pub source: FogResource,
    pub target: FogResource,
}

/// 可用的阴影贴图
/// Shadow maps the render stage may read this frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShadowAvailability {
    pub main_light: bool,
    pub additional_lights: bool,
}

impl ShadowAvailability {
    pub fn any(&self) -> bool {
        self.main_light || self.additional_lights
    }
}

/// 一帧的雾效计划
/// Stage declarations and blit sequence of one frame for one view
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct FogFramePlan {
    pub stages: Vec<StageDeclaration>,
    pub blits: Vec<Blit>,
    pub shadows: ShadowAvailability,
}

impl FogFramePlan {
    pub fn new(blur_iterations: u32, shadows: ShadowAvailability) -> Self {
        let mut render_reads = vec![FogResource::DownsampledDepth];
        if shadows.main_light {
            render_reads.push(FogResource::MainLightShadowMap);
        }
        if shadows.additional_lights {
            render_reads.push(FogResource::AdditionalLightsShadowMap);
        }

        let stages = vec![
            StageDeclaration {
                stage: PassStage::DownsampleDepth,
                reads: vec![FogResource::CameraDepth],
                writes: vec![FogResource::DownsampledDepth],
                exclusive: false,
            },
            StageDeclaration {
                stage: PassStage::FogRender,
                reads: render_reads,
                writes: vec![FogResource::Fog],
                exclusive: false,
            },
            StageDeclaration {
                stage: PassStage::Blur,
                reads: vec![FogResource::Fog, FogResource::Blur],
                writes: vec![FogResource::Fog, FogResource::Blur],
                exclusive: true,
            },
            StageDeclaration {
                stage: PassStage::UpsampleComposite,
                reads: vec![
                    FogResource::CameraDepth,
                    FogResource::DownsampledDepth,
                    FogResource::Fog,
                    FogResource::CameraColor,
                ],
                writes: vec![FogResource::Composite],
                exclusive: false,
            },
        ];

        let mut blits = vec![
            Blit {
                pass: FogPass::DownsampleDepth,
                source: FogResource::CameraDepth,
                target: FogResource::DownsampledDepth,
            },
            Blit {
                pass: FogPass::Render,
                source: FogResource::DownsampledDepth,
                target: FogResource::Fog,
            },
        ];
        for _ in 0..blur_iterations {
            blits.push(Blit {
                pass: FogPass::HorizontalBlur,
                source: FogResource::Fog,
                target: FogResource::Blur,
            });
            blits.push(Blit {
                pass: FogPass::VerticalBlur,
                source: FogResource::Blur,
                target: FogResource::Fog,
            });
        }
        blits.push(Blit {
            pass: FogPass::UpsampleComposite,
            source: FogResource::Fog,
            target: FogResource::Composite,
        });

        Self {
            stages,
            blits,
            shadows,
        }
    }

    pub fn blits_in(&self, stage: PassStage) -> impl Iterator<Item = &Blit> {
        self.blits.iter().filter(move |blit| blit.pass.stage() == stage)
    }

    /// 校验读写顺序
    /// Checks the producer/consumer ordering of the plan
    ///
    /// * stages appear in pipeline order
    /// * every non-external read was written by an earlier stage
    /// * a resource held by an exclusive stage is not written by any other stage
    ///   after it is produced
    /// * every blit belongs to a declared stage and blits keep stage order
    pub fn validate(&self) -> Result<(), FogPlanError> {
        let mut written: Vec<FogResource> = Vec::new();
        let mut last_stage: Option<PassStage> = None;

        for declaration in &self.stages {
            if last_stage.is_some_and(|last| declaration.stage <= last) {
                return Err(FogPlanError::OutOfOrder {
                    stage: declaration.stage,
                });
            }
            last_stage = Some(declaration.stage);

            for resource in &declaration.reads {
                let produced_here = declaration.exclusive && declaration.writes.contains(resource);
                if !resource.is_external() && !written.contains(resource) && !produced_here {
                    return Err(FogPlanError::ReadBeforeWrite {
                        stage: declaration.stage,
                        resource: *resource,
                    });
                }
            }
            written.extend(declaration.writes.iter().copied());
        }

        for exclusive in self.stages.iter().filter(|s| s.exclusive) {
            for other in self.stages.iter().filter(|s| s.stage != exclusive.stage) {
                if let Some(resource) = other
                    .writes
                    .iter()
                    .find(|r| exclusive.writes.contains(r) && other.stage > exclusive.stage)
                {
                    return Err(FogPlanError::ExclusiveConflict {
                        stage: other.stage,
                        resource: *resource,
                    });
                }
            }
        }

        let mut last_blit_stage: Option<PassStage> = None;
        for blit in &self.blits {
            let stage = blit.pass.stage();
            if !self.stages.iter().any(|s| s.stage == stage) {
                return Err(FogPlanError::UndeclaredBlit { stage });
            }
            if last_blit_stage.is_some_and(|last| stage < last) {
                return Err(FogPlanError::OutOfOrder { stage });
            }
            last_blit_stage = Some(stage);
        }

        Ok(())
    }
}
