use crate::ops::{InputList, IntoOpResult, OpError, Operator, OutputList};
use crate::tensor::Tensor;

/// Spatial output size of a convolution along one axis.
fn conv_output_size(
    input: usize,
    kernel: usize,
    stride: usize,
    pad_start: usize,
    pad_end: usize,
    dilation: usize,
) -> Result<usize, OpError> {
    let padded = input + pad_start + pad_end;
    let window = dilation * (kernel - 1) + 1;
    if stride == 0 {
        return Err(OpError::InvalidValue("stride must be > 0"));
    }
    if padded < window {
        return Err(OpError::IncompatibleInputShapes(
            "kernel is larger than padded input",
        ));
    }
    Ok((padded - window) / stride + 1)
}

fn check_conv_shapes(input: &[usize], weight: &[usize]) -> Result<(), OpError> {
    if input.len() != 4 || weight.len() != 4 {
        return Err(OpError::IncompatibleInputShapes(
            "input and weight must have 4 dims (NCHW / MCKK)",
        ));
    }
    if input[1] != weight[1] {
        return Err(OpError::IncompatibleInputShapes(
            "input channels do not match weight channels",
        ));
    }
    Ok(())
}

/// 2D convolution over an NCHW input with an MCKK weight and optional
/// per-output-channel bias.
///
/// This is a direct implementation; the kernel in this crate's demo network
/// is pointwise, so there is nothing for an im2col + GEMM lowering to win.
/// Groups other than 1 are not supported.
pub fn conv(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    strides: [usize; 2],
    pads: [usize; 4],
    dilations: [usize; 2],
) -> Result<Tensor, OpError> {
    check_conv_shapes(input.shape(), weight.shape())?;

    let [batch, in_c, in_h, in_w] = [
        input.shape()[0],
        input.shape()[1],
        input.shape()[2],
        input.shape()[3],
    ];
    let [out_c, _, k_h, k_w] = [
        weight.shape()[0],
        weight.shape()[1],
        weight.shape()[2],
        weight.shape()[3],
    ];
    let [stride_h, stride_w] = strides;
    let [pad_top, pad_left, pad_bottom, pad_right] = pads;
    let [dil_h, dil_w] = dilations;

    if let Some(bias) = bias {
        if bias.len() != out_c {
            return Err(OpError::IncompatibleInputShapes(
                "bias length does not match output channels",
            ));
        }
    }

    let out_h = conv_output_size(in_h, k_h, stride_h, pad_top, pad_bottom, dil_h)?;
    let out_w = conv_output_size(in_w, k_w, stride_w, pad_left, pad_right, dil_w)?;

    let x = input.data();
    let w = weight.data();
    let mut out = vec![0.0f32; batch * out_c * out_h * out_w];

    let mut out_pos = 0;
    for n in 0..batch {
        let x_batch = &x[n * in_c * in_h * in_w..];
        for m in 0..out_c {
            let w_chan = &w[m * in_c * k_h * k_w..(m + 1) * in_c * k_h * k_w];
            let bias_val = bias.map(|b| b.data()[m]).unwrap_or(0.0);
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut acc = bias_val;
                    for c in 0..in_c {
                        for kh in 0..k_h {
                            let ih = (oh * stride_h + kh * dil_h) as isize - pad_top as isize;
                            if ih < 0 || ih >= in_h as isize {
                                continue;
                            }
                            for kw in 0..k_w {
                                let iw = (ow * stride_w + kw * dil_w) as isize - pad_left as isize;
                                if iw < 0 || iw >= in_w as isize {
                                    continue;
                                }
                                let x_idx =
                                    c * in_h * in_w + ih as usize * in_w + iw as usize;
                                let w_idx = c * k_h * k_w + kh * k_w + kw;
                                acc += x_batch[x_idx] * w_chan[w_idx];
                            }
                        }
                    }
                    out[out_pos] = acc;
                    out_pos += 1;
                }
            }
        }
    }

    Ok(Tensor::from_data(&[batch, out_c, out_h, out_w], out))
}

/// 2D convolution operator.
///
/// Attributes follow the ONNX `Conv` operator: `strides`, `pads` (top, left,
/// bottom, right) and `dilations`, with the usual defaults.
#[derive(Clone, Debug)]
pub struct Conv {
    pub strides: [usize; 2],
    pub pads: [usize; 4],
    pub dilations: [usize; 2],
}

impl Default for Conv {
    fn default() -> Conv {
        Conv {
            strides: [1, 1],
            pads: [0; 4],
            dilations: [1, 1],
        }
    }
}

impl Operator for Conv {
    fn name(&self) -> &str {
        "Conv"
    }

    fn run(&self, inputs: InputList) -> Result<OutputList, OpError> {
        let input = inputs.require(0)?;
        let weight = inputs.require(1)?;
        let bias = inputs.get(2);
        conv(input, weight, bias, self.strides, self.pads, self.dilations)?.into_op_result()
    }

    fn infer_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>, OpError> {
        let (input, weight) = match inputs {
            [input, weight] | [input, weight, _] => (*input, *weight),
            _ => return Err(OpError::MissingInputs),
        };
        check_conv_shapes(input, weight)?;

        let out_h = conv_output_size(
            input[2],
            weight[2],
            self.strides[0],
            self.pads[0],
            self.pads[2],
            self.dilations[0],
        )?;
        let out_w = conv_output_size(
            input[3],
            weight[3],
            self.strides[1],
            self.pads[1],
            self.pads[3],
            self.dilations[1],
        )?;
        Ok(vec![input[0], weight[0], out_h, out_w])
    }
}

#[cfg(test)]
mod tests {
    use super::{conv, Conv};
    use crate::ops::{OpError, Operator};
    use crate::tensor::Tensor;

    #[test]
    fn test_pointwise_conv() {
        // 1x2x2x2 input, 1x1 kernel mixing two channels into one.
        let input = Tensor::from_data(
            &[1, 2, 2, 2],
            vec![
                1.0, 2.0, 3.0, 4.0, // channel 0
                5.0, 6.0, 7.0, 8.0, // channel 1
            ],
        );
        let weight = Tensor::from_data(&[1, 2, 1, 1], vec![2.0, 3.0]);
        let bias = Tensor::from_data(&[1], vec![1.0]);

        let result = conv(&input, &weight, Some(&bias), [1, 1], [0; 4], [1, 1]).unwrap();
        assert_eq!(result.shape(), &[1, 1, 2, 2]);
        // out = 2 * ch0 + 3 * ch1 + 1
        assert_eq!(result.data(), &[18.0, 23.0, 28.0, 33.0]);
    }

    #[test]
    fn test_conv_with_padding() {
        // 3x3 input, 3x3 kernel of ones, pad 1 on all sides.
        let input = Tensor::from_data(
            &[1, 1, 3, 3],
            vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        );
        let weight = Tensor::full(&[1, 1, 3, 3], 1.0);

        let result = conv(&input, &weight, None, [1, 1], [1, 1, 1, 1], [1, 1]).unwrap();
        assert_eq!(result.shape(), &[1, 1, 3, 3]);
        // Each output counts the in-bounds neighbors (inclusive).
        assert_eq!(
            result.data(),
            &[4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]
        );
    }

    #[test]
    fn test_conv_with_stride() {
        let input = Tensor::from_data(&[1, 1, 4, 4], (1..=16).map(|x| x as f32).collect());
        let weight = Tensor::full(&[1, 1, 2, 2], 1.0);

        let result = conv(&input, &weight, None, [2, 2], [0; 4], [1, 1]).unwrap();
        assert_eq!(result.shape(), &[1, 1, 2, 2]);
        assert_eq!(result.data(), &[14.0, 22.0, 46.0, 54.0]);
    }

    #[test]
    fn test_conv_channel_mismatch() {
        let input = Tensor::zeros(&[1, 3, 2, 2]);
        let weight = Tensor::zeros(&[1, 2, 1, 1]);
        assert!(matches!(
            conv(&input, &weight, None, [1, 1], [0; 4], [1, 1]),
            Err(OpError::IncompatibleInputShapes(_))
        ));
    }

    #[test]
    fn test_infer_shape() {
        let op = Conv::default();
        let shape = op
            .infer_shape(&[&[16, 32, 300, 300], &[16, 32, 1, 1], &[16]])
            .unwrap();
        assert_eq!(shape, vec![16, 16, 300, 300]);
    }
}
