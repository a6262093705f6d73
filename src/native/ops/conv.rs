use serde::{Deserialize, Serialize};

use crate::native::descriptor::OperandDescriptor;
use crate::native::error::{ensure_valid, NativeResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputOperandLayout {
    #[default]
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperandLayout {
    #[default]
    Oihw,
    Hwio,
    Ohwi,
    Ihwo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoPad {
    #[default]
    Explicit,
    SameUpper,
    SameLower,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundingType {
    #[default]
    Floor,
    Ceil,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2dOptions {
    /// `[begin_h, end_h, begin_w, end_w]`.
    pub padding: Vec<i32>,
    pub strides: Vec<i32>,
    pub dilations: Vec<i32>,
    pub groups: i32,
    pub auto_pad: AutoPad,
    pub input_layout: InputOperandLayout,
    pub filter_layout: FilterOperandLayout,
}

impl Default for Conv2dOptions {
    fn default() -> Self {
        Self {
            padding: vec![0; 4],
            strides: vec![1; 2],
            dilations: vec![1; 2],
            groups: 1,
            auto_pad: AutoPad::Explicit,
            input_layout: InputOperandLayout::Nchw,
            filter_layout: FilterOperandLayout::Oihw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool2dOptions {
    /// Defaults to the whole spatial extent of the input.
    pub window_dimensions: Option<Vec<i32>>,
    pub padding: Vec<i32>,
    pub strides: Vec<i32>,
    pub dilations: Vec<i32>,
    pub auto_pad: AutoPad,
    pub layout: InputOperandLayout,
    pub rounding_type: RoundingType,
    /// Explicit output sizes; must agree with floor or ceil rounding.
    pub output_sizes: Option<Vec<i32>>,
}

impl Default for Pool2dOptions {
    fn default() -> Self {
        Self {
            window_dimensions: None,
            padding: vec![0; 4],
            strides: vec![1; 2],
            dilations: vec![1; 2],
            auto_pad: AutoPad::Explicit,
            layout: InputOperandLayout::Nchw,
            rounding_type: RoundingType::Floor,
            output_sizes: None,
        }
    }
}

/// `(batch, channels, height, width)` of a 4-D input.
fn split_input(layout: InputOperandLayout, d: &[i32]) -> (i32, i32, i32, i32) {
    match layout {
        InputOperandLayout::Nchw => (d[0], d[1], d[2], d[3]),
        InputOperandLayout::Nhwc => (d[0], d[3], d[1], d[2]),
    }
}

fn join_output(layout: InputOperandLayout, n: i32, c: i32, h: i32, w: i32) -> Vec<i32> {
    match layout {
        InputOperandLayout::Nchw => vec![n, c, h, w],
        InputOperandLayout::Nhwc => vec![n, h, w, c],
    }
}

/// `(out_channels, in_channels_per_group, height, width)` of a filter.
fn split_filter(layout: FilterOperandLayout, d: &[i32]) -> (i32, i32, i32, i32) {
    match layout {
        FilterOperandLayout::Oihw => (d[0], d[1], d[2], d[3]),
        FilterOperandLayout::Hwio => (d[3], d[2], d[0], d[1]),
        FilterOperandLayout::Ohwi => (d[0], d[3], d[1], d[2]),
        FilterOperandLayout::Ihwo => (d[3], d[0], d[1], d[2]),
    }
}

/// `(begin, end)` padding for the `Same*` modes.
pub(crate) fn implicit_padding(auto_pad: AutoPad, dilation: i32, input: i32, filter: i32, stride: i32) -> (i32, i32) {
    let out = (input + stride - 1) / stride;
    let dilated = (filter - 1) * dilation + 1;
    let needed = (out - 1) * stride + dilated;
    let total = if needed > input { needed - input } else { 0 };
    match auto_pad {
        AutoPad::SameLower => ((total + 1) / 2, total / 2),
        AutoPad::SameUpper | AutoPad::Explicit => (total / 2, (total + 1) / 2),
    }
}

fn check_window_params(padding: &[i32], strides: &[i32], dilations: &[i32]) -> NativeResult<()> {
    ensure_valid!(padding.len() == 4, "padding must have 4 values, got {}", padding.len());
    ensure_valid!(strides.len() == 2, "strides must have 2 values, got {}", strides.len());
    ensure_valid!(dilations.len() == 2, "dilations must have 2 values, got {}", dilations.len());
    ensure_valid!(padding.iter().all(|&p| p >= 0), "padding must not be negative");
    ensure_valid!(strides.iter().all(|&s| s > 0), "strides must be positive");
    ensure_valid!(dilations.iter().all(|&d| d > 0), "dilations must be positive");
    Ok(())
}

/// Padded span minus the dilated window, checked to be non-negative.
fn spatial_span(input: i32, window: i32, dilation: i32, begin: i32, end: i32) -> NativeResult<i32> {
    let dilated = (window - 1) * dilation + 1;
    let span = input - dilated + begin + end;
    ensure_valid!(
        span >= 0,
        "window {} (dilation {}) does not fit padded input {}",
        window,
        dilation,
        input + begin + end
    );
    Ok(span)
}

fn resolve_padding(
    auto_pad: AutoPad,
    padding: &[i32],
    dilations: &[i32],
    strides: &[i32],
    input: (i32, i32),
    window: (i32, i32),
) -> [i32; 4] {
    match auto_pad {
        AutoPad::Explicit => [padding[0], padding[1], padding[2], padding[3]],
        _ => {
            let (bh, eh) = implicit_padding(auto_pad, dilations[0], input.0, window.0, strides[0]);
            let (bw, ew) = implicit_padding(auto_pad, dilations[1], input.1, window.1, strides[1]);
            [bh, eh, bw, ew]
        }
    }
}

pub(super) fn conv2d(
    options: &Conv2dOptions,
    input: &OperandDescriptor,
    filter: &OperandDescriptor,
    bias: Option<&OperandDescriptor>,
) -> NativeResult<OperandDescriptor> {
    ensure_valid!(input.rank() == 4, "conv2d input must be 4-D");
    ensure_valid!(filter.rank() == 4, "conv2d filter must be 4-D");
    check_window_params(&options.padding, &options.strides, &options.dilations)?;
    ensure_valid!(options.groups > 0, "groups must be positive");

    let (n, c, h, w) = split_input(options.input_layout, &input.dimensions);
    let (out_c, in_c, fh, fw) = split_filter(options.filter_layout, &filter.dimensions);
    ensure_valid!(
        c == in_c * options.groups,
        "input channels {} do not match filter channels {} x groups {}",
        c,
        in_c,
        options.groups
    );
    if let Some(bias) = bias {
        ensure_valid!(
            bias.dimensions == [out_c],
            "bias shape {:?} does not match output channels {}",
            bias.dimensions,
            out_c
        );
    }

    let pad = resolve_padding(
        options.auto_pad,
        &options.padding,
        &options.dilations,
        &options.strides,
        (h, w),
        (fh, fw),
    );
    let out_h = 1 + spatial_span(h, fh, options.dilations[0], pad[0], pad[1])? / options.strides[0];
    let out_w = 1 + spatial_span(w, fw, options.dilations[1], pad[2], pad[3])? / options.strides[1];

    Ok(input.with_dimensions(join_output(options.input_layout, n, out_c, out_h, out_w)))
}

pub(super) fn pool2d(options: &Pool2dOptions, input: &OperandDescriptor) -> NativeResult<OperandDescriptor> {
    ensure_valid!(input.rank() == 4, "pool2d input must be 4-D");
    check_window_params(&options.padding, &options.strides, &options.dilations)?;

    let (n, c, h, w) = split_input(options.layout, &input.dimensions);
    let (wh, ww) = match &options.window_dimensions {
        Some(window) => {
            ensure_valid!(window.len() == 2, "window dimensions must have 2 values");
            ensure_valid!(window.iter().all(|&d| d > 0), "window dimensions must be positive");
            (window[0], window[1])
        }
        None => (h, w),
    };

    let pad = resolve_padding(
        options.auto_pad,
        &options.padding,
        &options.dilations,
        &options.strides,
        (h, w),
        (wh, ww),
    );
    let span_h = spatial_span(h, wh, 1, pad[0], pad[1])?;
    let span_w = spatial_span(w, ww, 1, pad[2], pad[3])?;
    let floor = (1 + span_h / options.strides[0], 1 + span_w / options.strides[1]);
    let ceil = (
        1 + (span_h + options.strides[0] - 1) / options.strides[0],
        1 + (span_w + options.strides[1] - 1) / options.strides[1],
    );

    let (out_h, out_w) = match &options.output_sizes {
        Some(sizes) => {
            ensure_valid!(sizes.len() == 2, "output sizes must have 2 values");
            let sizes = (sizes[0], sizes[1]);
            ensure_valid!(sizes == floor || sizes == ceil, "Invalid output sizes.");
            sizes
        }
        None => match options.rounding_type {
            RoundingType::Floor => floor,
            RoundingType::Ceil => ceil,
        },
    };

    Ok(input.with_dimensions(join_output(options.layout, n, c, out_h, out_w)))
}
