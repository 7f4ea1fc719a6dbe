use std::io::Cursor;

use tract_tflite::prelude::*;
use tract_tflite::prelude::Tensor as TractTensor;

use crate::{
    engine::{BoundingBox, Detection, Executor, InferenceFault, ModelError},
    tensor::{Tensor, TensorShape},
};

/// How pixel bytes get staged into the model's input tensor.
enum Staging {
    /// u8-family input; cast to the model's exact (possibly quantized) type.
    Bytes(DatumType),
    /// f32 input; pixels scaled to [0,1].
    Floats,
}

/// TFLite-backed executor for SSD-style detectors.
///
/// The model blob is parsed once; input type, output layout and staging
/// sizes are all locked in here so `invoke` only runs the plan and reads the
/// detection quad back out.
pub struct TfliteExecutor {
    plan: TypedSimplePlan<TypedModel>,
    input_shape: TensorShape,
    staging: Staging,
    scratch: Vec<f32>,
    arena: usize,
}

impl TfliteExecutor {
    /// Parses an opaque `.tflite` blob and locks in its contract.
    pub fn from_bytes(blob: &[u8]) -> Result<Self, ModelError> {
        let mut reader = Cursor::new(blob);
        let model = tract_tflite::tflite()
            .model_for_read(&mut reader)
            .map_err(ModelError::Load)?
            .into_optimized()
            .map_err(ModelError::Load)?;

        let input_fact = model.input_fact(0).map_err(ModelError::Load)?;
        let dims = input_fact.shape.as_concrete().ok_or_else(|| {
            ModelError::InputContract("model input shape is not fully determined".into())
        })?;
        if dims.len() != 4 || dims[0] != 1 {
            return Err(ModelError::InputContract(format!(
                "expected NHWC input with batch 1, got {dims:?}"
            )));
        }
        let input_shape = TensorShape {
            width: dims[2] as u32,
            height: dims[1] as u32,
            channels: dims[3] as u32,
        };

        let input_type = input_fact.datum_type;
        let staging = if input_type == DatumType::F32 {
            Staging::Floats
        } else if input_type.unquantized() == DatumType::U8 {
            Staging::Bytes(input_type)
        } else {
            return Err(ModelError::InputContract(format!(
                "unsupported model input type {input_type:?}"
            )));
        };

        if model.outputs.len() != 4 {
            return Err(ModelError::OutputLayout(format!(
                "expected the 4-tensor detection quad, model has {} outputs",
                model.outputs.len()
            )));
        }

        // Input staging plus every declared output buffer is what this
        // executor keeps in flight per call.
        let mut arena = input_shape.volume() * input_type.size_of().max(1);
        for index in 0..model.outputs.len() {
            let fact = model.output_fact(index).map_err(ModelError::Load)?;
            if let Some(shape) = fact.shape.as_concrete() {
                arena += shape.iter().product::<usize>() * fact.datum_type.size_of().max(1);
            }
        }

        let scratch = match staging {
            Staging::Floats => Vec::with_capacity(input_shape.volume()),
            Staging::Bytes(_) => Vec::new(),
        };

        let plan = model.into_runnable().map_err(ModelError::Load)?;
        Ok(Self {
            plan,
            input_shape,
            staging,
            scratch,
            arena,
        })
    }
}

impl Executor for TfliteExecutor {
    fn input_shape(&self) -> TensorShape {
        self.input_shape
    }

    fn arena_requirement(&self) -> usize {
        self.arena
    }

    fn invoke(&mut self, input: &Tensor) -> Result<Vec<Detection>, InferenceFault> {
        let shape = [
            1,
            self.input_shape.height as usize,
            self.input_shape.width as usize,
            self.input_shape.channels as usize,
        ];
        let staged = match &self.staging {
            Staging::Floats => {
                self.scratch.clear();
                self.scratch
                    .extend(input.data().iter().map(|&byte| byte as f32 / 255.0));
                TractTensor::from_shape(&shape, &self.scratch)
                    .map_err(|err| InferenceFault::Execution(err.to_string()))?
            }
            Staging::Bytes(datum_type) => {
                let bytes = TractTensor::from_shape(&shape, input.data())
                    .map_err(|err| InferenceFault::Execution(err.to_string()))?;
                if *datum_type == DatumType::U8 {
                    bytes
                } else {
                    bytes
                        .cast_to_dt(*datum_type)
                        .map_err(|err| InferenceFault::Execution(err.to_string()))?
                        .into_owned()
                }
            }
        };

        let outputs = self
            .plan
            .run(tvec!(staged.into()))
            .map_err(|err| InferenceFault::Execution(err.to_string()))?;
        candidates_from_outputs(&outputs)
    }
}

/// Reads the TFLite detection-postprocess quad: boxes `[1,N,4]` in
/// ymin/xmin/ymax/xmax order, classes `[1,N]`, scores `[1,N]`, count `[1]`.
fn candidates_from_outputs(outputs: &[TValue]) -> Result<Vec<Detection>, InferenceFault> {
    if outputs.len() != 4 {
        return Err(InferenceFault::Output(format!(
            "expected the 4-tensor detection quad, got {} outputs",
            outputs.len()
        )));
    }
    let boxes = view_f32(&outputs[0])?;
    let classes = view_f32(&outputs[1])?;
    let scores = view_f32(&outputs[2])?;
    let count = view_f32(&outputs[3])?;

    let declared = count.first().copied().unwrap_or(0.0).max(0.0) as usize;
    let n = declared.min(scores.len()).min(classes.len());
    if boxes.len() < n * 4 {
        return Err(InferenceFault::Output(format!(
            "box tensor holds {} values for {n} detections",
            boxes.len()
        )));
    }

    let mut candidates = Vec::with_capacity(n);
    for index in 0..n {
        let corner = index * 4;
        candidates.push(Detection {
            class_id: classes[index] as i64,
            score: scores[index],
            bbox: BoundingBox {
                x_min: boxes[corner + 1],
                y_min: boxes[corner],
                x_max: boxes[corner + 3],
                y_max: boxes[corner + 2],
            },
        });
    }
    Ok(candidates)
}

fn view_f32(value: &TValue) -> Result<&[f32], InferenceFault> {
    value
        .as_slice::<f32>()
        .map_err(|err| InferenceFault::Output(err.to_string()))
}
