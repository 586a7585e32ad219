use std::io::Cursor;

use affine_layer::{
    AffineTransform, Layer, LayerErr, LayerKind,
    codec::{TokenReader, TokenWriter},
    optimization::{TrainOptions, UpdateRule},
};
use ndarray::array;
use rand::{SeedableRng, rngs::StdRng};

const PROTO: &str = "<AffineTransform> <InputDim> 4 <OutputDim> 3 <ParamRange> 0.5 <LearnRateCoef> 0.25 <MaxGrad> 2";

fn trained(rule: UpdateRule) -> Layer {
    let mut rng = StdRng::seed_from_u64(3);
    let mut layer = Layer::init(PROTO, &mut rng).unwrap();

    let x = array![[0.1_f32, -0.7, 1.3, 0.4], [2.0, 0.5, -0.3, -1.1]];
    let opts = TrainOptions::new(0.05, 0.3);
    for _ in 0..4 {
        let y = layer.forward(x.view()).unwrap();
        layer.backward(x.view(), y.view(), y.view(), &opts).unwrap();
        layer.update(&opts, rule).unwrap();
    }

    layer
}

fn encode(layer: &Layer, binary: bool) -> Vec<u8> {
    let mut w = TokenWriter::new(Vec::new(), binary);
    w.write_header().unwrap();
    layer.write(&mut w).unwrap();
    w.into_inner()
}

fn decode(bytes: Vec<u8>) -> Result<Layer, LayerErr> {
    let mut r = TokenReader::detect(Cursor::new(bytes))?;
    Layer::read(&mut r)
}

fn assert_same_state(a: &AffineTransform, b: &AffineTransform) {
    assert_eq!(a.weight(), b.weight());
    assert_eq!(a.bias(), b.bias());
    assert_eq!(a.learn_rate_coef().to_bits(), b.learn_rate_coef().to_bits());
    assert_eq!(a.max_grad().to_bits(), b.max_grad().to_bits());

    match (a.adaptive(), b.adaptive()) {
        (None, None) => {}
        (Some(a), Some(b)) => {
            assert_eq!(a.weight_accu(), b.weight_accu());
            assert_eq!(a.bias_accu(), b.bias_accu());
        }
        _ => panic!("adaptive state presence differs"),
    }
}

#[test]
fn sgd_layer_round_trips_in_both_encodings() {
    let layer = trained(UpdateRule::Sgd);
    assert!(!layer.as_affine().unwrap().is_adaptive_initialized());

    for binary in [true, false] {
        let restored = decode(encode(&layer, binary)).unwrap();
        assert_eq!(restored.kind(), LayerKind::AffineTransform);
        assert_same_state(layer.as_affine().unwrap(), restored.as_affine().unwrap());
    }
}

#[test]
fn adaptive_state_survives_round_trip() {
    for rule in [UpdateRule::AdaGrad, UpdateRule::RmsProp] {
        let layer = trained(rule);
        assert!(layer.as_affine().unwrap().is_adaptive_initialized());

        for binary in [true, false] {
            let restored = decode(encode(&layer, binary)).unwrap();
            assert_same_state(layer.as_affine().unwrap(), restored.as_affine().unwrap());
        }
    }
}

#[test]
fn binary_stream_has_header_and_tags() {
    let bytes = encode(&trained(UpdateRule::AdaGrad), true);
    assert!(bytes.starts_with(b"\0B<AffineTransform> "));

    let contains = |needle: &[u8]| bytes.windows(needle.len()).any(|w| w == needle);
    assert!(contains(b"<LearnRateCoef> "));
    assert!(contains(b"<MaxGrad> "));
    assert!(contains(b"<AffineAccus> FM "));
    assert!(contains(b"FV "));
}

#[test]
fn text_stream_is_readable() {
    let mut layer = AffineTransform::new(2, 2);
    layer.set_weight(array![[1., 2.], [3., 4.]].view()).unwrap();
    layer.set_bias(array![0.5, -0.5].view()).unwrap();

    let text = String::from_utf8(encode(&Layer::Affine(layer), false)).unwrap();
    assert_eq!(
        text,
        "<AffineTransform> 2 2 \n<LearnRateCoef> 1 <MaxGrad> 0  [\n  1 2\n  3 4 ]\n [ 0.5 -0.5 ]\n"
    );
}

#[test]
fn streams_without_tags_use_defaults() {
    let text = "<AffineTransform> 1 2\n [\n  1.5 -2 ]\n [ 0.25 ]\n";
    let layer = decode(text.as_bytes().to_vec()).unwrap();

    let affine = layer.as_affine().unwrap();
    assert_eq!(affine.weight(), array![[1.5_f32, -2.]]);
    assert_eq!(affine.bias(), array![0.25_f32]);
    assert_eq!(affine.learn_rate_coef(), 1.0);
    assert_eq!(affine.max_grad(), 0.0);
    assert!(!affine.is_adaptive_initialized());
}

#[test]
fn tags_may_appear_in_any_order() {
    let text = "<AffineTransform> 1 1 <MaxGrad> 3 <AffineAccus> [\n  9 ]\n [ 4 ]\n <LearnRateCoef> 0.5 [\n  1 ]\n [ 2 ]\n";
    let layer = decode(text.as_bytes().to_vec()).unwrap();

    let affine = layer.as_affine().unwrap();
    assert_eq!(affine.max_grad(), 3.0);
    assert_eq!(affine.learn_rate_coef(), 0.5);
    assert_eq!(affine.adaptive().unwrap().weight_accu(), &array![[9.0_f32]]);
    assert_eq!(affine.adaptive().unwrap().bias_accu(), &array![4.0_f32]);
}

#[test]
fn mismatched_dimensions_are_rejected() {
    let text = "<AffineTransform> 2 2 <LearnRateCoef> 1 [\n  1 2 3\n  4 5 6 ]\n [ 7 8 ]\n";
    assert!(matches!(
        decode(text.as_bytes().to_vec()),
        Err(LayerErr::ShapeMismatch { what: "weight", .. })
    ));

    let text = "<AffineTransform> 1 1 <AffineAccus> [\n  1 1 ]\n [ 1 ]\n [\n  1 ]\n [ 2 ]\n";
    assert!(matches!(
        decode(text.as_bytes().to_vec()),
        Err(LayerErr::ShapeMismatch { what: "weight accumulator", .. })
    ));
}

#[test]
fn read_dispatches_on_layer_tag() {
    let mut w = TokenWriter::new(Vec::new(), true);
    w.write_header().unwrap();
    Layer::sigmoid(5).write(&mut w).unwrap();
    trained(UpdateRule::Sgd).write(&mut w).unwrap();

    let mut r = TokenReader::detect(Cursor::new(w.into_inner())).unwrap();
    let first = Layer::read(&mut r).unwrap();
    let second = Layer::read(&mut r).unwrap();

    assert_eq!(first.kind(), LayerKind::Sigmoid);
    assert_eq!((first.input_dim(), first.output_dim()), (5, 5));
    assert_eq!(second.kind(), LayerKind::AffineTransform);
    assert_eq!((second.input_dim(), second.output_dim()), (4, 3));
}

#[test]
fn tensors_sharing_a_line_are_read() {
    let text = "<AffineTransform> 1 2 <LearnRateCoef> 1 <MaxGrad> 0 [ 1 2 ] [ 3 ]";
    let layer = decode(text.as_bytes().to_vec()).unwrap();

    let affine = layer.as_affine().unwrap();
    assert_eq!(affine.weight(), array![[1.0_f32, 2.]]);
    assert_eq!(affine.bias(), array![3.0_f32]);
}

#[test]
fn layers_without_inputs_round_trip() {
    for binary in [true, false] {
        let restored = decode(encode(&Layer::affine(0, 2), binary)).unwrap();
        assert_eq!((restored.input_dim(), restored.output_dim()), (0, 2));
        assert_eq!(restored.as_affine().unwrap().weight().dim(), (2, 0));
    }
}

#[test]
fn oversized_dimensions_fail_without_allocating() {
    let mut w = TokenWriter::new(Vec::new(), true);
    w.write_header().unwrap();
    w.write_token(LayerKind::AffineTransform.token()).unwrap();
    w.write_i32(i32::MAX).unwrap();
    w.write_i32(i32::MAX).unwrap();
    w.write_token("FM").unwrap();
    w.write_i32(i32::MAX).unwrap();
    w.write_i32(i32::MAX).unwrap();
    let mut bytes = w.into_inner();
    bytes.extend_from_slice(&[0; 16]);

    assert!(matches!(decode(bytes), Err(LayerErr::Io(_))));
}

#[test]
fn unknown_layer_tag_is_rejected() {
    let err = decode(b"<Softmax> 2 2\n".to_vec()).unwrap_err();
    assert!(matches!(err, LayerErr::UnknownLayer(tag) if tag == "<Softmax>"));
}

#[test]
fn truncated_binary_stream_fails() {
    let mut bytes = encode(&trained(UpdateRule::RmsProp), true);
    bytes.truncate(bytes.len() - 3);
    assert!(matches!(decode(bytes), Err(LayerErr::Io(_))));
}

#[test]
fn training_resumes_identically_from_checkpoint() {
    let x = array![[0.3_f32, -0.2, 0.9, -1.0], [1.2, 0.1, 0.0, 0.6]];
    let t = array![[0.5_f32, -0.5, 1.0], [0.0, 0.2, -0.3]];
    let opts = TrainOptions::new(0.02, 0.0);

    let step = |layer: &mut Layer| {
        let y = layer.forward(x.view()).unwrap();
        let d = &y - &t;
        layer.backward(x.view(), y.view(), d.view(), &opts).unwrap();
        layer.update(&opts, UpdateRule::RmsProp).unwrap();
    };

    let mut original = trained(UpdateRule::RmsProp);
    let mut resumed = decode(encode(&original, true)).unwrap();

    for _ in 0..5 {
        step(&mut original);
        step(&mut resumed);
    }

    assert_same_state(original.as_affine().unwrap(), resumed.as_affine().unwrap());
}
