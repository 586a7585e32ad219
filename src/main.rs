use std::{
    env,
    fs::File,
    io::{BufReader, BufWriter, Write},
    process,
};

use affine_layer::{
    Layer,
    codec::{TokenReader, TokenWriter},
    optimization::{TrainOptions, UpdateRule},
};
use anyhow::{Context, bail};
use log::info;
use ndarray::{Array2, array};
use ndarray_rand::RandomExt;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Normal, Uniform};

const PROTO: &str = "<AffineTransform> <InputDim> 3 <OutputDim> 2 <ParamRange> 0.05 <MaxGrad> 10";
const ITERS: usize = 300;
const BATCH_SIZE: usize = 32;
const SEED: u64 = 42;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage: {} <sgd|adagrad|rmsprop> <checkpoint> [--text]",
            args[0]
        );
        process::exit(1);
    }

    let rule: UpdateRule = args[1].parse()?;
    let path = &args[2];
    let binary = !args[3..].iter().any(|arg| arg == "--text");

    let opts = match rule {
        UpdateRule::Sgd => TrainOptions::new(0.01, 0.5),
        UpdateRule::AdaGrad | UpdateRule::RmsProp => TrainOptions::new(0.05, 0.0),
    };

    let mut rng = StdRng::seed_from_u64(SEED);
    let target_w = array![[0.5_f32, -0.3, 0.8], [0.2, 0.4, -0.6]];
    let target_b = array![0.1_f32, -0.2];
    let inputs = Uniform::new_inclusive(-1.0_f32, 1.0)?;
    let noise = Normal::new(0.0_f32, 0.01)?;

    let mut layer = Layer::init(PROTO, &mut rng)?;
    info!("training {PROTO} with {rule} for {ITERS} iterations");

    for iter in 0..ITERS {
        let x = Array2::random_using((BATCH_SIZE, 3), &inputs, &mut rng);
        let t = x.dot(&target_w.t()) + &target_b
            + Array2::random_using((BATCH_SIZE, 2), &noise, &mut rng);

        let y = layer.forward(x.view())?;
        let d = &y - &t;
        let loss = 0.5 * d.mapv(|v| v * v).sum() / BATCH_SIZE as f32;

        layer.backward(x.view(), y.view(), d.view(), &opts)?;
        layer.update(&opts, rule)?;

        if iter % 50 == 0 || iter + 1 == ITERS {
            info!("iter {iter}: loss {loss:.6}");
        }
    }

    let file = File::create(path).with_context(|| format!("creating checkpoint {path}"))?;
    let mut w = TokenWriter::new(BufWriter::new(file), binary);
    w.write_header()?;
    layer.write(&mut w)?;
    w.into_inner().flush()?;
    info!("wrote checkpoint {path} (binary={binary})");

    let file = File::open(path).with_context(|| format!("opening checkpoint {path}"))?;
    let mut r = TokenReader::detect(BufReader::new(file))?;
    let restored = Layer::read(&mut r)?;

    let params = |l: &Layer| l.as_affine().map(|a| a.params());
    if params(&restored) != params(&layer) {
        bail!("checkpoint {path} does not reproduce the trained parameters");
    }

    println!("parameters:{}", restored.info());
    println!("gradients:{}", layer.info_gradient());
    Ok(())
}
