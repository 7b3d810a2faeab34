use criterion::{black_box, criterion_group, criterion_main, Criterion};
use motion_viewer::character::CharacterModel;
use motion_viewer::kinematics::SkeletonTrack;
use motion_viewer::motion::Motion;
use motion_viewer::pickle;
use motion_viewer::types::LoopMode;

const CHAIN_XML: &str = r#"<mujoco model="chain">
  <worldbody>
    <body name="b0" pos="0 0 1">
      <freejoint/>
      <body name="b1" pos="0 0 0.2"><joint type="ball"/>
        <body name="b2" pos="0 0 0.2"><joint type="ball"/>
          <body name="b3" pos="0 0 0.2"><joint type="ball"/>
            <body name="b4" pos="0 0 0.2"><joint axis="1 0 0"/>
              <body name="b5" pos="0 0 0.2"><joint axis="0 1 0"/></body>
            </body>
          </body>
        </body>
      </body>
    </body>
  </worldbody>
</mujoco>"#;

pub fn criterion_benchmark(c: &mut Criterion) {
    let model = CharacterModel::from_xml_str(CHAIN_XML).unwrap();
    let width = 6 + model.num_dofs();
    let frames = (0..3000)
        .map(|i| (0..width).map(|j| ((i * width + j) as f64 * 0.001).sin()).collect())
        .collect();
    let motion = Motion::new(30.0, LoopMode::Wrap, frames).unwrap();
    let bytes = pickle::to_bytes(&motion.to_value().unwrap()).unwrap();

    let mut group = c.benchmark_group("sample-size-example");
    group.sample_size(10);
    group.bench_function("decode 3000 frames", |b| {
        b.iter(|| black_box(Motion::from_pickle_bytes(black_box(&bytes)).unwrap()))
    });
    group.bench_function("pose 3000 frames", |b| {
        b.iter(|| black_box(SkeletonTrack::compute(&model, &motion).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
