//! Renders an `ArtifactPlan` as a self-contained Rust module.
//!
//! Same records as the C artifact, as `#[repr(C)]` statics referencing each
//! other through `&'static` borrows.

use proc_macro2::{Ident, Literal, Span, TokenStream};
use quote::quote;

use crate::error::Result;
use crate::ir::{DataLayout, OpParam, PadMode, PoolMethod, TensorRole, TinyOp};

use super::plan::*;

pub fn render_module(plan: &ArtifactPlan) -> TokenStream {
    let types = render_types();
    let shifts = render_shifts(plan);
    let data = render_data(plan);
    let tensors = render_tensors(plan);
    let params = render_params(plan);
    let nodes = render_nodes(plan);
    let graph = render_graph(plan);

    quote! {
        //! Generated tiny graph. Do not modify.

        #![allow(dead_code)]

        #types

        #shifts

        #data

        #tensors

        #params

        #nodes

        #graph
    }
}

/// Render and pretty-print the module source.
pub fn format_module(plan: &ArtifactPlan) -> Result<String> {
    let file: syn::File = syn::parse2(render_module(plan))?;
    Ok(prettyplease::unparse(&file))
}

// ---------------------------------------------------------------------------
// Runtime record types
// ---------------------------------------------------------------------------

fn render_types() -> TokenStream {
    quote! {
        pub const NN_TINY_VERSION_1: i32 = 1;
        pub const NN_OP_VERSION_1: i32 = 1;

        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum TensorType { Input, Var, Const }

        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum OpType { Conv, DwConv, Fc, Pool, Relu, Softmax, Reshape }

        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Pad { Same, Valid }

        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum PoolMethod { Max, Avg }

        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Layout { Nhwc, Nchw }

        #[repr(C)]
        #[derive(Debug)]
        pub struct TinyTensor {
            pub dim_num: i32,
            pub dims: [i32; 4],
            pub shift: i32,
            pub tensor_type: TensorType,
            pub data: Option<&'static [i8]>,
        }

        #[repr(C)]
        #[derive(Debug)]
        pub struct ConvParam {
            pub kernel_h: i32,
            pub kernel_w: i32,
            pub stride_h: i32,
            pub stride_w: i32,
            pub pad_h: Pad,
            pub pad_w: Pad,
            pub activation: i32,
        }

        #[repr(C)]
        #[derive(Debug)]
        pub struct PoolParam {
            pub kernel_h: i32,
            pub kernel_w: i32,
            pub stride_h: i32,
            pub stride_w: i32,
            pub pad_h: Pad,
            pub pad_w: Pad,
            pub pool_method: PoolMethod,
        }

        #[derive(Debug)]
        pub enum OpParam {
            None,
            Conv(&'static ConvParam),
            Pool(&'static PoolParam),
        }

        #[repr(C)]
        #[derive(Debug)]
        pub struct TinyNode {
            pub input_num: i32,
            pub output_num: i32,
            pub op_type: OpType,
            pub op_ver: i32,
            pub op_param: OpParam,
            pub input: &'static [&'static TinyTensor],
            pub output: &'static TinyTensor,
        }

        #[repr(C)]
        #[derive(Debug)]
        pub struct TinyGraph {
            pub name: &'static str,
            pub tiny_version: i32,
            pub nn_id: u32,
            pub create_time: u32,
            pub layout: Layout,
            pub node_num: usize,
            pub node_list: &'static [&'static TinyNode],
        }
    }
}

// ---------------------------------------------------------------------------
// Shifts and quantized data
// ---------------------------------------------------------------------------

fn render_shifts(plan: &ArtifactPlan) -> TokenStream {
    let entries = plan.shifts.iter().map(|shift| {
        let name = static_ident(&shift.symbol);
        let value = int_lit(shift.value as i64);
        quote! { pub const #name: i32 = #value; }
    });
    quote!(#(#entries)*)
}

fn render_data(plan: &ArtifactPlan) -> TokenStream {
    let entries = plan.constants.iter().map(|data| {
        let name = static_ident(&data.define);
        let len = Literal::usize_unsuffixed(data.values.len());
        let values = data.values.iter().map(|&v| int_lit(v as i64));
        quote! { static #name: [i8; #len] = [#(#values),*]; }
    });
    quote!(#(#entries)*)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

fn render_tensors(plan: &ArtifactPlan) -> TokenStream {
    let entries = plan.tensors.iter().map(|tensor| {
        let name = static_ident(&tensor.symbol);
        let dim_num = int_lit(tensor.dims.len() as i64);
        let mut dims: Vec<TokenStream> = tensor.dims.iter().map(|&d| int_lit(d as i64)).collect();
        dims.resize_with(MAX_DIMS, || int_lit(0));
        let shift = match &tensor.shift {
            ShiftRef::Zero => int_lit(0),
            ShiftRef::Symbol(symbol) => {
                let ident = static_ident(symbol);
                quote!(#ident)
            }
        };
        let tensor_type = match tensor.role {
            TensorRole::Input => quote!(TensorType::Input),
            TensorRole::Variable => quote!(TensorType::Var),
            TensorRole::Constant => quote!(TensorType::Const),
        };
        // `data` holds the C array name; the Rust static is named after the define
        let constant = tensor
            .data
            .as_ref()
            .and_then(|array| plan.constants.iter().find(|c| &c.array == array));
        let data = match constant {
            Some(constant) => {
                let ident = static_ident(&constant.define);
                quote!(Some(&#ident))
            }
            None => quote!(None),
        };
        quote! {
            static #name: TinyTensor = TinyTensor {
                dim_num: #dim_num,
                dims: [#(#dims),*],
                shift: #shift,
                tensor_type: #tensor_type,
                data: #data,
            };
        }
    });
    quote!(#(#entries)*)
}

fn render_params(plan: &ArtifactPlan) -> TokenStream {
    let entries = plan.params.iter().map(|record| {
        let name = static_ident(&record.symbol);
        match &record.param {
            OpParam::Conv(conv) => {
                let (kh, kw, sh, sw) = spatial_lits(conv.kernel_h, conv.kernel_w, conv.stride_h, conv.stride_w);
                let pad = pad_tokens(conv.pad);
                let activation = int_lit(conv.activation as i64);
                quote! {
                    static #name: ConvParam = ConvParam {
                        kernel_h: #kh,
                        kernel_w: #kw,
                        stride_h: #sh,
                        stride_w: #sw,
                        pad_h: #pad,
                        pad_w: #pad,
                        activation: #activation,
                    };
                }
            }
            OpParam::Pool(pool) => {
                let (kh, kw, sh, sw) = spatial_lits(pool.kernel_h, pool.kernel_w, pool.stride_h, pool.stride_w);
                let pad = pad_tokens(pool.pad);
                let method = match pool.method {
                    PoolMethod::Max => quote!(PoolMethod::Max),
                    PoolMethod::Avg => quote!(PoolMethod::Avg),
                };
                quote! {
                    static #name: PoolParam = PoolParam {
                        kernel_h: #kh,
                        kernel_w: #kw,
                        stride_h: #sh,
                        stride_w: #sw,
                        pad_h: #pad,
                        pad_w: #pad,
                        pool_method: #method,
                    };
                }
            }
        }
    });
    quote!(#(#entries)*)
}

fn render_nodes(plan: &ArtifactPlan) -> TokenStream {
    let entries = plan.nodes.iter().map(|node| {
        let name = static_ident(&node.symbol);
        let input_num = int_lit(node.inputs.len() as i64);
        let op_type = op_type_tokens(node.op);
        let op_param = match &node.param {
            Some(symbol) => {
                let ident = static_ident(symbol);
                match plan.params.iter().find(|p| &p.symbol == symbol).map(|p| &p.param) {
                    Some(OpParam::Pool(_)) => quote!(OpParam::Pool(&#ident)),
                    _ => quote!(OpParam::Conv(&#ident)),
                }
            }
            None => quote!(OpParam::None),
        };
        let inputs = node.inputs.iter().map(|i| static_ident(i));
        let output = static_ident(&node.output);
        quote! {
            static #name: TinyNode = TinyNode {
                input_num: #input_num,
                output_num: 1,
                op_type: #op_type,
                op_ver: NN_OP_VERSION_1,
                op_param: #op_param,
                input: &[#(&#inputs),*],
                output: &#output,
            };
        }
    });
    quote!(#(#entries)*)
}

// ---------------------------------------------------------------------------
// Node list and graph root
// ---------------------------------------------------------------------------

fn render_graph(plan: &ArtifactPlan) -> TokenStream {
    let meta = &plan.meta;
    let node_num = Literal::usize_unsuffixed(plan.nodes.len());
    let nodes = plan.nodes.iter().map(|n| static_ident(&n.symbol));
    let name = &meta.name;
    let nn_id = Literal::u32_unsuffixed(meta.nn_id);
    let create_time = Literal::u32_unsuffixed(meta.create_date);
    let layout = match meta.layout {
        DataLayout::Nhwc => quote!(Layout::Nhwc),
        DataLayout::Nchw => quote!(Layout::Nchw),
    };

    quote! {
        pub static NODE_LIST: [&TinyNode; #node_num] = [#(&#nodes),*];

        static TINY_GRAPH: TinyGraph = TinyGraph {
            name: #name,
            tiny_version: NN_TINY_VERSION_1,
            nn_id: #nn_id,
            create_time: #create_time,
            layout: #layout,
            node_num: #node_num,
            node_list: &NODE_LIST,
        };

        pub fn get_tiny_graph() -> &'static TinyGraph {
            &TINY_GRAPH
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Upper-cased static identifier; symbol bases are unique ignoring case.
fn static_ident(symbol: &str) -> Ident {
    Ident::new(&symbol.to_ascii_uppercase(), Span::call_site())
}

fn int_lit(v: i64) -> TokenStream {
    let lit = Literal::u64_unsuffixed(v.unsigned_abs());
    if v < 0 {
        quote!(-#lit)
    } else {
        quote!(#lit)
    }
}

fn spatial_lits(
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
) -> (TokenStream, TokenStream, TokenStream, TokenStream) {
    (
        int_lit(kernel_h as i64),
        int_lit(kernel_w as i64),
        int_lit(stride_h as i64),
        int_lit(stride_w as i64),
    )
}

fn pad_tokens(pad: PadMode) -> TokenStream {
    match pad {
        PadMode::Same => quote!(Pad::Same),
        PadMode::Valid => quote!(Pad::Valid),
    }
}

fn op_type_tokens(op: TinyOp) -> TokenStream {
    match op {
        TinyOp::Conv => quote!(OpType::Conv),
        TinyOp::DwConv => quote!(OpType::DwConv),
        TinyOp::Fc => quote!(OpType::Fc),
        TinyOp::Pool => quote!(OpType::Pool),
        TinyOp::Relu => quote!(OpType::Relu),
        TinyOp::Softmax => quote!(OpType::Softmax),
        TinyOp::Reshape => quote!(OpType::Reshape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{compile_plan, fixtures::kws_graph};
    use crate::config::GenConfig;
    use crate::ir::Graph;

    fn kws_plan() -> ArtifactPlan {
        let graph = Graph::from_def(kws_graph()).unwrap();
        let config = GenConfig {
            create_date: Some(20190909),
            ..GenConfig::default()
        };
        compile_plan(&graph, &config).unwrap()
    }

    fn item_names(file: &syn::File) -> Vec<String> {
        file.items
            .iter()
            .filter_map(|item| match item {
                syn::Item::Static(s) => Some(s.ident.to_string()),
                syn::Item::Const(c) => Some(c.ident.to_string()),
                syn::Item::Fn(f) => Some(f.sig.ident.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn module_parses() {
        let source = format_module(&kws_plan()).unwrap();
        let file = syn::parse_file(&source).unwrap();
        let names = item_names(&file);
        for expected in [
            "CONV1_WEIGHTS_SHIFT",
            "FC_MATMUL_SHIFT",
            "CONV1_WEIGHTS_DATA",
            "X_0",
            "CONV1_BIASADD_0",
            "POOL_PARAM",
            "CONV1_CONV2D_NODE",
            "NODE_LIST",
            "TINY_GRAPH",
            "get_tiny_graph",
        ] {
            assert!(names.iter().any(|n| n == expected), "{expected} missing: {names:?}");
        }
    }

    #[test]
    fn definitions_precede_uses() {
        let source = format_module(&kws_plan()).unwrap();
        let at = |needle: &str| {
            source
                .find(needle)
                .unwrap_or_else(|| panic!("'{needle}' missing from:\n{source}"))
        };
        assert!(at("pub const CONV1_BIASES_SHIFT") < at("static CONV1_BIASES_0"));
        assert!(at("static CONV1_WEIGHTS_DATA") < at("static CONV1_WEIGHTS_0"));
        assert!(at("static POOL_PARAM") < at("static POOL_NODE"));
        assert!(at("pub static NODE_LIST") < at("static TINY_GRAPH"));
    }

    #[test]
    fn shift_values_and_negative_data() {
        let source = format_module(&kws_plan()).unwrap();
        assert!(source.contains("pub const FC_MATMUL_SHIFT: i32 = 9;"), "{source}");
        assert!(source.contains("static CONV1_BIASES_DATA: [i8; 2] = [64, -32];"), "{source}");
        assert!(source.contains("op_param: OpParam::Pool(&POOL_PARAM)"), "{source}");
        assert!(source.contains("data: Some(&FC_WEIGHTS_DATA)"), "{source}");
    }
}
