//! Vulkan backend implementation using ash
//!
//! Headless: there is no surface or swapchain. The backend maps the
//! renderer's model onto Vulkan 1.3 as follows:
//!
//! - Binding signatures become pipeline layouts with one descriptor set per
//!   non-push-constant parameter, in parameter order, plus one set holding the
//!   static samplers as immutable samplers. Inside a table set, each range is
//!   one arrayed binding numbered by its position in the table.
//! - Descriptor heaps live on the CPU. Setting a table or a constant buffer
//!   copies the referenced views into a descriptor set allocated from the
//!   command list's transient pools.
//! - Every queue owns a timeline semaphore whose counter is the fence value.
//! - Render targets use dynamic rendering, barriers `vkCmdPipelineBarrier2`.

mod convert;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::descriptor::DescriptorHandle;
use crate::shader::ShaderBytecode;
use crate::pipeline::{
    BindingSignatureDesc, ComputePipelineDesc, DescriptorRangeType, GraphicsPipelineDesc,
    ResourceDimension, RootParameter,
};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CString;
use std::ops::Range;
use std::sync::Arc;

const API_VERSION: u32 = vk::API_VERSION_1_3;
const DESCRIPTOR_STRIDE: u32 = 32;
const GPU_ADDRESS_BIT: u64 = 1 << 63;
const TRANSIENT_POOL_SETS: u32 = 256;
const STATIC_POOL_SETS: u32 = 64;

fn queue_index(queue: QueueType) -> usize {
    match queue {
        QueueType::Direct => 0,
        QueueType::Compute => 1,
        QueueType::Copy => 2,
    }
}

/// Vulkan backend implementation
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    allocator: Option<Arc<Mutex<Allocator>>>,
    device_name: String,
    max_uniform_range: u64,

    queues: Vec<VkQueue>,
    static_pool: vk::DescriptorPool,

    // Resource storage
    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkTexture>,
    heaps: HashMap<u64, VkHeap>,
    samplers: HashMap<SamplerDescriptor, vk::Sampler>,
    signatures: HashMap<u64, VkSignature>,
    pipelines: HashMap<u64, VkPipeline>,
    command_lists: HashMap<u64, VkCommandList>,

    next_handle: u64,
}

struct VkQueue {
    queue: vk::Queue,
    timeline: vk::Semaphore,
    last_signalled: u64,
    command_pool: vk::CommandPool,
    in_flight: Vec<RetiredCommandList>,
}

struct RetiredCommandList {
    command_buffer: vk::CommandBuffer,
    descriptor_pools: Vec<vk::DescriptorPool>,
    fence: u64,
}

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

struct VkTexture {
    image: vk::Image,
    allocation: Allocation,
    format: TextureFormat,
    /// View over every mip and layer, used for sampling
    view: vk::ImageView,
    /// View used as a render or depth attachment
    attachment_view: vk::ImageView,
    /// One view per mip level for storage access; empty without unordered access
    storage_views: Vec<vk::ImageView>,
    width: u32,
    height: u32,
    mip_levels: u32,
    layers: u32,
    initial_state: ResourceState,
    /// False until the image has left `UNDEFINED`
    initialized: bool,
}

struct VkHeap {
    kind: DescriptorHeapKind,
    slots: Vec<Option<DescriptorView>>,
}

struct VkSignature {
    desc: BindingSignatureDesc,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_stages: vk::ShaderStageFlags,
    sampler_set: Option<vk::DescriptorSet>,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

struct VkCommandList {
    queue: QueueType,
    label: String,
    command_buffer: vk::CommandBuffer,
    descriptor_pools: Vec<vk::DescriptorPool>,
    signature: Option<(vk::PipelineBindPoint, u64)>,
}

struct QueueFamilies {
    direct: u32,
    compute: u32,
    copy: u32,
}

impl VulkanBackend {
    /// Create a headless device on the best available adapter
    pub fn new() -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"scene-renderer")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"scene-renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);
        let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let (physical_device, families) = Self::select_physical_device(&instance)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let features = vk::PhysicalDeviceFeatures::default()
            .geometry_shader(supported.geometry_shader == vk::TRUE)
            .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
            .depth_clamp(supported.depth_clamp == vk::TRUE);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let mut unique_families = vec![families.direct, families.compute, families.copy];
        unique_families.sort_unstable();
        unique_families.dedup();
        let priorities = [1.0f32];
        let queue_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_features(&features)
            .push_next(&mut features12)
            .push_next(&mut features13);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let queues = [families.direct, families.compute, families.copy]
            .into_iter()
            .map(|family| Self::create_queue(&device, family))
            .collect::<BackendResult<Vec<_>>>()?;

        let static_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: STATIC_POOL_SETS * 4,
        }];
        let static_pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(STATIC_POOL_SETS)
            .pool_sizes(&static_sizes);
        let static_pool = unsafe { device.create_descriptor_pool(&static_pool_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        log::info!(
            "Vulkan device: {} ({:?}), API {}.{}",
            device_name,
            properties.device_type,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );

        Ok(Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            allocator: Some(Arc::new(Mutex::new(allocator))),
            device_name,
            max_uniform_range: u64::from(properties.limits.max_uniform_buffer_range),
            queues,
            static_pool,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            heaps: HashMap::new(),
            samplers: HashMap::new(),
            signatures: HashMap::new(),
            pipelines: HashMap::new(),
            command_lists: HashMap::new(),
            next_handle: 1,
        })
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn allocator(&self) -> Option<Arc<Mutex<Allocator>>> {
        self.allocator.clone()
    }

    fn select_physical_device(
        instance: &ash::Instance,
    ) -> BackendResult<(vk::PhysicalDevice, QueueFamilies)> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        physical_devices
            .into_iter()
            .filter(|&pd| {
                let properties = unsafe { instance.get_physical_device_properties(pd) };
                properties.api_version >= API_VERSION
            })
            .filter_map(|pd| Some((pd, Self::find_queue_families(instance, pd)?)))
            .max_by_key(|(pd, _)| {
                let properties = unsafe { instance.get_physical_device_properties(*pd) };
                match properties.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                    _ => 0,
                }
            })
            .ok_or_else(|| {
                BackendError::NoSuitableAdapter(
                    "no Vulkan 1.3 device with a graphics and compute queue".to_string(),
                )
            })
    }

    fn find_queue_families(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Option<QueueFamilies> {
        let properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let find = |include: vk::QueueFlags, exclude: vk::QueueFlags| {
            properties
                .iter()
                .position(|p| p.queue_flags.contains(include) && !p.queue_flags.intersects(exclude))
                .map(|index| index as u32)
        };

        let direct = find(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::empty(),
        )?;
        let compute = find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(direct);
        let copy = find(
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap_or(compute);
        Some(QueueFamilies {
            direct,
            compute,
            copy,
        })
    }

    fn create_queue(device: &ash::Device, family: u32) -> BackendResult<VkQueue> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        unsafe {
            let timeline = device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
            let command_pool = device
                .create_command_pool(&pool_info, None)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
            Ok(VkQueue {
                queue: device.get_device_queue(family, 0),
                timeline,
                last_signalled: 0,
                command_pool,
                in_flight: Vec::new(),
            })
        }
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<vk::Sampler> {
        if let Some(&sampler) = self.samplers.get(desc) {
            return Ok(sampler);
        }
        let sampler = unsafe { self.device.create_sampler(&convert::sampler_info(desc), None) }
            .map_err(|e| BackendError::SignatureCreationFailed(e.to_string()))?;
        self.samplers.insert(*desc, sampler);
        Ok(sampler)
    }

    fn command_buffer(&self, cmd: CommandList) -> Option<vk::CommandBuffer> {
        let list = self.command_lists.get(&cmd.0);
        if list.is_none() {
            log::error!("Vulkan: command {:?} is not open", cmd);
        }
        list.map(|list| list.command_buffer)
    }

    /// Bound signature of a command list
    fn bound_signature(&self, cmd: CommandList) -> Option<(vk::PipelineBindPoint, &VkSignature)> {
        let (bind_point, signature) = self.command_lists.get(&cmd.0)?.signature?;
        let signature = self.signatures.get(&signature)?;
        Some((bind_point, signature))
    }

    /// Move a fresh image out of `UNDEFINED` into the layout of its creation state
    fn initialize_texture(&mut self, command_buffer: vk::CommandBuffer, texture: NativeTexture) {
        let Some(tex) = self.textures.get_mut(&texture.0) else {
            return;
        };
        if tex.initialized {
            return;
        }
        tex.initialized = true;
        let after = convert::state_scope(tex.initial_state);
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(after.stages)
            .dst_access_mask(after.access)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(after.layout)
            .image(tex.image)
            .subresource_range(full_range(tex));
        let dependency =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(command_buffer, &dependency) };
    }

    /// Release command lists whose fence the queue has passed
    fn reclaim(&mut self, queue: QueueType) {
        let index = queue_index(queue);
        let completed = self.completed_fence_value(queue).0;
        let device = &self.device;
        let state = &mut self.queues[index];
        let command_pool = state.command_pool;
        state.in_flight.retain(|list| {
            if list.fence > completed {
                return true;
            }
            unsafe {
                device.free_command_buffers(command_pool, &[list.command_buffer]);
                for &pool in &list.descriptor_pools {
                    device.destroy_descriptor_pool(pool, None);
                }
            }
            false
        });
    }

    fn submit_to_queue(
        &mut self,
        queue: QueueType,
        command_buffer: Option<vk::CommandBuffer>,
    ) -> BackendResult<u64> {
        let state = &mut self.queues[queue_index(queue)];
        let value = state.last_signalled + 1;

        let command_buffers: Vec<_> = command_buffer
            .into_iter()
            .map(|cb| vk::CommandBufferSubmitInfo::default().command_buffer(cb))
            .collect();
        let signal = vk::SemaphoreSubmitInfo::default()
            .semaphore(state.timeline)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(std::slice::from_ref(&signal));

        unsafe {
            self.device
                .queue_submit2(state.queue, &[submit], vk::Fence::null())
                .map_err(|e| match e {
                    vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
                    e => BackendError::SubmitFailed(e.to_string()),
                })?;
        }
        state.last_signalled = value;
        Ok(value)
    }
}

fn full_range(texture: &VkTexture) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: convert::full_aspect(texture.format),
        base_mip_level: 0,
        level_count: texture.mip_levels,
        base_array_layer: 0,
        layer_count: texture.layers,
    }
}

fn allocate_transient_set(
    device: &ash::Device,
    pools: &mut Vec<vk::DescriptorPool>,
    layout: vk::DescriptorSetLayout,
) -> BackendResult<vk::DescriptorSet> {
    let layouts = [layout];
    if let Some(&pool) = pools.last() {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        match unsafe { device.allocate_descriptor_sets(&info) } {
            Ok(sets) => return Ok(sets[0]),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {}
            Err(e) => return Err(BackendError::RecordingFailed(e.to_string())),
        }
    }

    let sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: TRANSIENT_POOL_SETS,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: TRANSIENT_POOL_SETS,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: TRANSIENT_POOL_SETS,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: TRANSIENT_POOL_SETS / 4,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: TRANSIENT_POOL_SETS / 4,
        },
    ];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(TRANSIENT_POOL_SETS)
        .pool_sizes(&sizes);
    let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
        .map_err(|e| BackendError::RecordingFailed(e.to_string()))?;
    pools.push(pool);

    let info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    unsafe { device.allocate_descriptor_sets(&info) }
        .map(|sets| sets[0])
        .map_err(|e| BackendError::RecordingFailed(e.to_string()))
}

/// Copies heap views into descriptor sets
struct DescriptorWriter<'a> {
    device: &'a ash::Device,
    buffers: &'a HashMap<u64, VkBuffer>,
    textures: &'a HashMap<u64, VkTexture>,
    samplers: &'a HashMap<SamplerDescriptor, vk::Sampler>,
}

impl DescriptorWriter<'_> {
    fn buffer(&self, buffer: NativeBuffer) -> BackendResult<&VkBuffer> {
        self.buffers
            .get(&buffer.0)
            .ok_or(BackendError::InvalidHandle("buffer"))
    }

    fn texture(&self, texture: NativeTexture) -> BackendResult<&VkTexture> {
        self.textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle("texture"))
    }

    fn write(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        element: u32,
        view: &DescriptorView,
    ) -> BackendResult<()> {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(element);

        match view {
            DescriptorView::ConstantBuffer {
                buffer,
                offset,
                size,
            } => {
                let info = vk::DescriptorBufferInfo {
                    buffer: self.buffer(*buffer)?.buffer,
                    offset: *offset,
                    range: *size,
                };
                let write = write
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(&info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorView::StructuredBuffer {
                buffer,
                first_element,
                element_count,
                stride,
            }
            | DescriptorView::StorageBuffer {
                buffer,
                first_element,
                element_count,
                stride,
            } => {
                let info = vk::DescriptorBufferInfo {
                    buffer: self.buffer(*buffer)?.buffer,
                    offset: first_element * u64::from(*stride),
                    range: u64::from(*element_count) * u64::from(*stride),
                };
                let write = write
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(&info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorView::Texture { texture, .. } => {
                let info = vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: self.texture(*texture)?.view,
                    image_layout: vk::ImageLayout::READ_ONLY_OPTIMAL,
                };
                let write = write
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(std::slice::from_ref(&info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorView::StorageTexture {
                texture, mip_level, ..
            } => {
                let image_view = *self
                    .texture(*texture)?
                    .storage_views
                    .get(*mip_level as usize)
                    .ok_or(BackendError::InvalidHandle("storage texture view"))?;
                let info = vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view,
                    image_layout: vk::ImageLayout::GENERAL,
                };
                let write = write
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(std::slice::from_ref(&info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorView::Sampler(desc) => {
                let info = vk::DescriptorImageInfo {
                    sampler: *self
                        .samplers
                        .get(desc)
                        .ok_or(BackendError::InvalidHandle("sampler"))?,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                };
                let write = write
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(std::slice::from_ref(&info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorView::RenderTarget { .. } | DescriptorView::DepthStencil { .. } => {
                return Err(BackendError::RecordingFailed(
                    "attachment views can't be bound to shaders".to_string(),
                ));
            }
            DescriptorView::AccelerationStructure(_) => {
                return Err(BackendError::RecordingFailed(
                    "acceleration structures need ray query support".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    /// Acceleration structures arrive as GPU addresses, which Vulkan can't bind
    fn supports_raytracing(&self) -> bool {
        false
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> BackendResult<DescriptorHeapInfo> {
        if shader_visible && !kind.can_be_shader_visible() {
            return Err(BackendError::DescriptorHeapCreationFailed(format!(
                "{} heaps can't be shader visible",
                kind.name()
            )));
        }

        let handle = self.allocate_handle();
        self.heaps.insert(
            handle,
            VkHeap {
                kind,
                slots: vec![None; capacity as usize],
            },
        );
        log::debug!(
            "Vulkan: created {} descriptor heap ({} slots)",
            kind.name(),
            capacity
        );

        let cpu_base = handle << 32;
        Ok(DescriptorHeapInfo {
            heap: NativeHeap(handle),
            cpu_base,
            gpu_base: shader_visible.then_some(GPU_ADDRESS_BIT | cpu_base),
            stride: DESCRIPTOR_STRIDE,
        })
    }

    fn write_descriptor(
        &mut self,
        heap: NativeHeap,
        index: u32,
        view: &DescriptorView,
    ) -> BackendResult<()> {
        if let DescriptorView::Sampler(desc) = view {
            self.sampler(desc)?;
        }
        let heap = self
            .heaps
            .get_mut(&heap.0)
            .ok_or(BackendError::InvalidHandle("descriptor heap"))?;
        let kind = heap.kind;
        let slot = heap
            .slots
            .get_mut(index as usize)
            .ok_or(BackendError::InvalidHandle("descriptor slot"))?;
        *slot = Some(view.clone());
        log::trace!("Vulkan: wrote {} slot {}", kind.name(), index);
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<NativeBuffer> {
        let usage = vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::UNIFORM_BUFFER
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let location = match desc.heap {
            HeapKind::Default => MemoryLocation::GpuOnly,
            HeapKind::Upload => MemoryLocation::CpuToGpu,
            HeapKind::Readback => MemoryLocation::GpuToCpu,
        };

        unsafe {
            let buffer = self
                .device
                .create_buffer(&buffer_info, None)
                .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let allocation = self
                .allocator
                .as_ref()
                .ok_or_else(|| BackendError::BufferCreationFailed("Allocator not available".into()))?
                .lock()
                .allocate(&AllocationCreateDesc {
                    name: desc.label.as_deref().unwrap_or("buffer"),
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    self.device.destroy_buffer(buffer, None);
                    match e {
                        gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                        e => BackendError::BufferCreationFailed(e.to_string()),
                    }
                })?;

            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;

            let handle = self.allocate_handle();
            self.buffers.insert(
                handle,
                VkBuffer {
                    buffer,
                    allocation,
                    size: desc.size,
                },
            );
            Ok(NativeBuffer(handle))
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<NativeTexture> {
        let format = convert::format(desc.format);
        let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if !desc.flags.contains(ResourceFlags::DENY_SHADER_RESOURCE) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if desc.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if desc.flags.contains(ResourceFlags::ALLOW_DEPTH_STENCIL) {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        let storage = desc.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS);
        if storage {
            usage |= vk::ImageUsageFlags::STORAGE;
        }

        let layers = desc.array_layers();
        let mut create_flags = vk::ImageCreateFlags::empty();
        if desc.dimension == TextureDimension::Cube {
            create_flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        // sRGB formats have no storage support; storage views alias the linear format
        let storage_format = desc.format.storage_format();
        if storage && storage_format != desc.format {
            create_flags |= vk::ImageCreateFlags::MUTABLE_FORMAT | vk::ImageCreateFlags::EXTENDED_USAGE;
        }

        let image_info = vk::ImageCreateInfo::default()
            .flags(create_flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(layers)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        unsafe {
            let image = self
                .device
                .create_image(&image_info, None)
                .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
            let requirements = self.device.get_image_memory_requirements(image);

            let allocation = self
                .allocator
                .as_ref()
                .ok_or_else(|| BackendError::TextureCreationFailed("Allocator not available".into()))?
                .lock()
                .allocate(&AllocationCreateDesc {
                    name: desc.label.as_deref().unwrap_or("texture"),
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    self.device.destroy_image(image, None);
                    match e {
                        gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                        e => BackendError::TextureCreationFailed(e.to_string()),
                    }
                })?;

            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;

            let view_type = match desc.dimension {
                TextureDimension::D2 => vk::ImageViewType::TYPE_2D,
                TextureDimension::Cube => vk::ImageViewType::CUBE,
            };
            let view_info = |aspect_mask| {
                vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(view_type)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask,
                        base_mip_level: 0,
                        level_count: desc.mip_levels,
                        base_array_layer: 0,
                        layer_count: layers,
                    })
            };
            let view = self
                .device
                .create_image_view(&view_info(convert::sampled_aspect(desc.format)), None)
                .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
            let attachment_view = if convert::has_stencil(desc.format) {
                self.device
                    .create_image_view(&view_info(convert::full_aspect(desc.format)), None)
                    .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?
            } else {
                view
            };

            let mut storage_views = Vec::new();
            if storage {
                let storage_view_type = match desc.dimension {
                    TextureDimension::D2 => vk::ImageViewType::TYPE_2D,
                    TextureDimension::Cube => vk::ImageViewType::TYPE_2D_ARRAY,
                };
                for level in 0..desc.mip_levels {
                    let info = vk::ImageViewCreateInfo::default()
                        .image(image)
                        .view_type(storage_view_type)
                        .format(convert::format(storage_format))
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: level,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: layers,
                        });
                    let storage_view = self
                        .device
                        .create_image_view(&info, None)
                        .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
                    storage_views.push(storage_view);
                }
            }

            let handle = self.allocate_handle();
            self.textures.insert(
                handle,
                VkTexture {
                    image,
                    allocation,
                    format: desc.format,
                    view,
                    attachment_view,
                    storage_views,
                    width: desc.width,
                    height: desc.height,
                    mip_levels: desc.mip_levels,
                    layers,
                    initial_state: desc.initial_state,
                    initialized: false,
                },
            );
            Ok(NativeTexture(handle))
        }
    }

    fn write_buffer(&mut self, buffer: NativeBuffer, offset: u64, data: &[u8]) -> BackendResult<()> {
        let vk_buffer = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle("buffer"))?;
        let size = vk_buffer.size;
        let mapped = vk_buffer
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| BackendError::MapFailed("buffer is not host visible".to_string()))?;

        let start = offset as usize;
        let end = start + data.len();
        if end as u64 > size || end > mapped.len() {
            return Err(BackendError::MapFailed(format!(
                "write of {} bytes at {} exceeds {} bytes",
                data.len(),
                offset,
                size
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        if let Some(vk_buffer) = self.buffers.remove(&buffer.0) {
            unsafe {
                self.device.destroy_buffer(vk_buffer.buffer, None);
            }
            if let Some(ref allocator) = self.allocator {
                let _ = allocator.lock().free(vk_buffer.allocation);
            }
        }
    }

    fn destroy_texture(&mut self, texture: NativeTexture) {
        if let Some(vk_texture) = self.textures.remove(&texture.0) {
            unsafe {
                if vk_texture.attachment_view != vk_texture.view {
                    self.device
                        .destroy_image_view(vk_texture.attachment_view, None);
                }
                for storage_view in &vk_texture.storage_views {
                    self.device.destroy_image_view(*storage_view, None);
                }
                self.device.destroy_image_view(vk_texture.view, None);
                self.device.destroy_image(vk_texture.image, None);
            }
            if let Some(ref allocator) = self.allocator {
                let _ = allocator.lock().free(vk_texture.allocation);
            }
        }
    }

    fn create_binding_signature(
        &mut self,
        desc: &BindingSignatureDesc,
    ) -> BackendResult<NativeSignature> {
        let failed = |e: vk::Result| {
            BackendError::SignatureCreationFailed(format!("'{}': {}", desc.name, e))
        };

        let mut set_layouts = Vec::new();
        let mut push_stages = vk::ShaderStageFlags::empty();
        for parameter in &desc.parameters {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = match parameter {
                RootParameter::PushConstants { visibility, .. } => {
                    push_stages |= convert::visibility(*visibility);
                    continue;
                }
                RootParameter::ConstantBuffer { visibility, .. } => {
                    vec![vk::DescriptorSetLayoutBinding::default()
                        .binding(0)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .descriptor_count(1)
                        .stage_flags(convert::visibility(*visibility))]
                }
                RootParameter::DescriptorTable { ranges, visibility } => ranges
                    .iter()
                    .enumerate()
                    .filter(|(_, range)| {
                        let supported = range.dimension != ResourceDimension::AccelerationStructure;
                        if !supported {
                            log::debug!(
                                "Vulkan: signature '{}' leaves its acceleration structure range unbound",
                                desc.name
                            );
                        }
                        supported
                    })
                    .map(|(binding, range)| {
                        vk::DescriptorSetLayoutBinding::default()
                            .binding(binding as u32)
                            .descriptor_type(convert::descriptor_type(
                                range.range_type,
                                range.dimension,
                            ))
                            .descriptor_count(range.count)
                            .stage_flags(convert::visibility(*visibility))
                    })
                    .collect(),
            };
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }
                .map_err(failed)?;
            set_layouts.push(layout);
        }

        let mut sampler_set = None;
        if !desc.static_samplers.is_empty() {
            let samplers = desc
                .static_samplers
                .iter()
                .map(|s| self.sampler(&s.sampler))
                .collect::<BackendResult<Vec<_>>>()?;
            let bindings: Vec<_> = desc
                .static_samplers
                .iter()
                .zip(&samplers)
                .enumerate()
                .map(|(binding, (s, sampler))| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(binding as u32)
                        .descriptor_type(vk::DescriptorType::SAMPLER)
                        .stage_flags(convert::visibility(s.visibility))
                        .immutable_samplers(std::slice::from_ref(sampler))
                })
                .collect();
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }
                .map_err(failed)?;
            set_layouts.push(layout);

            let layouts = [layout];
            let allocate = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.static_pool)
                .set_layouts(&layouts);
            let sets = unsafe { self.device.allocate_descriptor_sets(&allocate) }.map_err(failed)?;
            sampler_set = sets.first().copied();
        }

        let push_size = desc.push_constant_size();
        let push_ranges: Vec<_> = (push_size > 0)
            .then(|| {
                vk::PushConstantRange::default()
                    .stage_flags(push_stages)
                    .offset(0)
                    .size(push_size)
            })
            .into_iter()
            .collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let layout =
            unsafe { self.device.create_pipeline_layout(&layout_info, None) }.map_err(failed)?;

        let handle = self.allocate_handle();
        self.signatures.insert(
            handle,
            VkSignature {
                desc: desc.clone(),
                layout,
                set_layouts,
                push_stages,
                sampler_set,
            },
        );
        log::debug!("Vulkan: created binding signature '{}'", desc.name);
        Ok(NativeSignature(handle))
    }

    fn compile_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> BackendResult<NativePipeline> {
        let failed = |reason: String| {
            BackendError::PipelineCreationFailed(format!("'{}': {}", desc.name, reason))
        };
        if desc.hull_shader.is_some() || desc.domain_shader.is_some() {
            return Err(failed("tessellation stages are not supported".to_string()));
        }
        let topology = convert::topology_class(desc.topology)
            .ok_or_else(|| failed("undefined topology".to_string()))?;
        let layout = self
            .signatures
            .get(&desc.signature.0)
            .ok_or(BackendError::InvalidHandle("binding signature"))?
            .layout;

        let shaders: Vec<_> = [
            Some(&desc.vertex_shader),
            desc.pixel_shader.as_ref(),
            desc.geometry_shader.as_ref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        let modules = ShaderModules::create(&self.device, &shaders).map_err(failed)?;
        let stages = modules.stage_infos();

        // Vertex input: one binding per slot, strides are set when buffers are bound
        let offsets = resolve_input_offsets(&desc.input_layout);
        let mut vertex_bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
        for element in &desc.input_layout {
            if vertex_bindings.iter().all(|b| b.binding != element.slot) {
                let input_rate = match element.step {
                    InputStepRate::PerVertex => vk::VertexInputRate::VERTEX,
                    InputStepRate::PerInstance(_) => vk::VertexInputRate::INSTANCE,
                };
                vertex_bindings.push(vk::VertexInputBindingDescription {
                    binding: element.slot,
                    stride: 0,
                    input_rate,
                });
            }
        }
        let attributes: Vec<_> = desc
            .input_layout
            .iter()
            .zip(&offsets)
            .enumerate()
            .map(|(location, (element, &offset))| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: element.slot,
                format: convert::vertex_format(element.format),
                offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology)
            .primitive_restart_enable(desc.primitive_restart);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let raster = &desc.rasterizer;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(convert::polygon_mode(raster.fill_mode))
            .cull_mode(convert::cull_mode(raster.cull_mode))
            .front_face(convert::front_face(raster.front_face))
            .depth_clamp_enable(!raster.depth_clip)
            .depth_bias_enable(raster.depth_bias != 0 || raster.slope_scaled_depth_bias != 0.0)
            .depth_bias_constant_factor(raster.depth_bias as f32)
            .depth_bias_clamp(raster.depth_bias_clamp)
            .depth_bias_slope_factor(raster.slope_scaled_depth_bias)
            .line_width(1.0);

        let sample_mask = [desc.sample_mask];
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(convert::sample_count(desc.sample_desc.count))
            .sample_mask(&sample_mask)
            .alpha_to_coverage_enable(desc.blend.alpha_to_coverage);

        let ds = &desc.depth_stencil;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(ds.depth_enabled)
            .depth_write_enable(ds.depth_write)
            .depth_compare_op(convert::compare_op(ds.depth_compare))
            .stencil_test_enable(ds.stencil_enabled)
            .front(convert::stencil_face(
                &ds.front,
                ds.stencil_read_mask,
                ds.stencil_write_mask,
            ))
            .back(convert::stencil_face(
                &ds.back,
                ds.stencil_read_mask,
                ds.stencil_write_mask,
            ));

        let blend_attachments: Vec<_> = desc
            .render_target_formats
            .iter()
            .map(|_| convert::blend_attachment(&desc.blend.target))
            .collect();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let mut dynamic_states = vec![
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::PRIMITIVE_TOPOLOGY,
        ];
        if !vertex_bindings.is_empty() {
            dynamic_states.push(vk::DynamicState::VERTEX_INPUT_BINDING_STRIDE);
        }
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats: Vec<_> = desc
            .render_target_formats
            .iter()
            .map(|&format| convert::format(format))
            .collect();
        let depth_format = desc
            .depth_format
            .map(convert::format)
            .unwrap_or(vk::Format::UNDEFINED);
        let stencil_format = match desc.depth_format {
            Some(format) if convert::has_stencil(format) => depth_format,
            _ => vk::Format::UNDEFINED,
        };
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering);

        let result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        modules.destroy(&self.device);
        let pipeline = result.map_err(|(_, e)| failed(e.to_string()))?[0];

        let handle = self.allocate_handle();
        self.pipelines.insert(
            handle,
            VkPipeline {
                pipeline,
                bind_point: vk::PipelineBindPoint::GRAPHICS,
            },
        );
        log::debug!("Vulkan: compiled graphics pipeline '{}'", desc.name);
        Ok(NativePipeline(handle))
    }

    fn compile_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> BackendResult<NativePipeline> {
        let failed = |reason: String| {
            BackendError::PipelineCreationFailed(format!("'{}': {}", desc.name, reason))
        };
        let layout = self
            .signatures
            .get(&desc.signature.0)
            .ok_or(BackendError::InvalidHandle("binding signature"))?
            .layout;

        let modules = ShaderModules::create(&self.device, &[&desc.compute_shader])
            .map_err(failed)?;
        let stages = modules.stage_infos();
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stages[0])
            .layout(layout);

        let result = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        modules.destroy(&self.device);
        let pipeline = result.map_err(|(_, e)| failed(e.to_string()))?[0];

        let handle = self.allocate_handle();
        self.pipelines.insert(
            handle,
            VkPipeline {
                pipeline,
                bind_point: vk::PipelineBindPoint::COMPUTE,
            },
        );
        log::debug!("Vulkan: compiled compute pipeline '{}'", desc.name);
        Ok(NativePipeline(handle))
    }

    fn begin_command_list(&mut self, queue: QueueType, label: &str) -> BackendResult<CommandList> {
        self.reclaim(queue);

        let state = &self.queues[queue_index(queue)];
        let allocate = vk::CommandBufferAllocateInfo::default()
            .command_pool(state.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let begin =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let command_buffer = unsafe {
            let command_buffer = self
                .device
                .allocate_command_buffers(&allocate)
                .map_err(|e| BackendError::RecordingFailed(e.to_string()))?[0];
            self.device
                .begin_command_buffer(command_buffer, &begin)
                .map_err(|e| BackendError::RecordingFailed(e.to_string()))?;
            command_buffer
        };

        let handle = self.allocate_handle();
        self.command_lists.insert(
            handle,
            VkCommandList {
                queue,
                label: label.to_string(),
                command_buffer,
                descriptor_pools: Vec::new(),
                signature: None,
            },
        );
        log::trace!("Vulkan: begin command list '{}' on {:?}", label, queue);
        Ok(CommandList(handle))
    }

    fn resource_barrier(&mut self, cmd: CommandList, barriers: &[ResourceBarrier]) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };

        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        for barrier in barriers {
            let (resource, before, after) = match *barrier {
                ResourceBarrier::Transition {
                    resource,
                    before,
                    after,
                } => (resource, before, after),
                ResourceBarrier::UnorderedAccess { resource } => (
                    resource,
                    ResourceState::UnorderedAccess,
                    ResourceState::UnorderedAccess,
                ),
            };
            let src = convert::state_scope(before);
            let dst = convert::state_scope(after);

            match resource {
                NativeResource::Buffer(buffer) => {
                    let Some(vk_buffer) = self.buffers.get(&buffer.0) else {
                        log::error!("Vulkan: barrier on unknown buffer {:?}", buffer);
                        continue;
                    };
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier2::default()
                            .src_stage_mask(src.stages)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stages)
                            .dst_access_mask(dst.access)
                            .buffer(vk_buffer.buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
                NativeResource::Texture(texture) => {
                    let Some(tex) = self.textures.get_mut(&texture.0) else {
                        log::error!("Vulkan: barrier on unknown texture {:?}", texture);
                        continue;
                    };
                    let old_layout = if tex.initialized {
                        src.layout
                    } else {
                        vk::ImageLayout::UNDEFINED
                    };
                    tex.initialized = true;
                    image_barriers.push(
                        vk::ImageMemoryBarrier2::default()
                            .src_stage_mask(src.stages)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stages)
                            .dst_access_mask(dst.access)
                            .old_layout(old_layout)
                            .new_layout(dst.layout)
                            .image(tex.image)
                            .subresource_range(full_range(tex)),
                    );
                }
            }
        }

        let dependency = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(command_buffer, &dependency) };
    }

    fn begin_rendering(&mut self, cmd: CommandList, desc: &RenderingDesc) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        for attachment in &desc.color_attachments {
            self.initialize_texture(command_buffer, attachment.texture);
        }
        if let Some(depth) = &desc.depth_attachment {
            self.initialize_texture(command_buffer, depth.texture);
        }

        let color_attachments: Vec<_> = desc
            .color_attachments
            .iter()
            .filter_map(|attachment| {
                let texture = self.textures.get(&attachment.texture.0)?;
                Some(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(texture.attachment_view)
                        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .load_op(convert::load_op(attachment.load_op))
                        .store_op(convert::store_op(attachment.store_op))
                        .clear_value(vk::ClearValue {
                            color: vk::ClearColorValue {
                                float32: attachment.clear_color,
                            },
                        }),
                )
            })
            .collect();
        let depth = desc.depth_attachment.as_ref().and_then(|attachment| {
            let texture = self.textures.get(&attachment.texture.0)?;
            let info = vk::RenderingAttachmentInfo::default()
                .image_view(texture.attachment_view)
                .image_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
                .load_op(convert::load_op(attachment.load_op))
                .store_op(convert::store_op(attachment.store_op))
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: attachment.clear_depth,
                        stencil: 0,
                    },
                });
            Some((info, convert::has_stencil(texture.format)))
        });

        let mut rendering = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some((depth, stencil)) = &depth {
            rendering = rendering.depth_attachment(depth);
            if *stencil {
                rendering = rendering.stencil_attachment(depth);
            }
        }
        unsafe { self.device.cmd_begin_rendering(command_buffer, &rendering) };
    }

    fn end_rendering(&mut self, cmd: CommandList) {
        if let Some(command_buffer) = self.command_buffer(cmd) {
            unsafe { self.device.cmd_end_rendering(command_buffer) };
        }
    }

    fn set_viewport(&mut self, cmd: CommandList, viewport: &Viewport) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.cmd_set_viewport(command_buffer, 0, &[viewport]) };
    }

    fn set_scissor(&mut self, cmd: CommandList, rect: &ScissorRect) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x as i32,
                y: rect.y as i32,
            },
            extent: vk::Extent2D {
                width: rect.width,
                height: rect.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(command_buffer, 0, &[scissor]) };
    }

    /// Tables name their heap through the handle, so there is nothing to bind
    fn set_descriptor_heaps(&mut self, _cmd: CommandList, _heaps: &[NativeHeap]) {}

    fn set_binding_signature(
        &mut self,
        cmd: CommandList,
        bind_point: BindPoint,
        signature: NativeSignature,
    ) {
        let bind_point = match bind_point {
            BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        let Some(list) = self.command_lists.get_mut(&cmd.0) else {
            log::error!("Vulkan: command {:?} is not open", cmd);
            return;
        };
        list.signature = Some((bind_point, signature.0));
        let command_buffer = list.command_buffer;

        let Some(vk_signature) = self.signatures.get(&signature.0) else {
            log::error!("Vulkan: unknown binding signature {:?}", signature);
            return;
        };
        if let (Some(set), Some(group)) = (
            vk_signature.sampler_set,
            vk_signature.desc.static_sampler_group(),
        ) {
            unsafe {
                self.device.cmd_bind_descriptor_sets(
                    command_buffer,
                    bind_point,
                    vk_signature.layout,
                    group,
                    &[set],
                    &[],
                )
            };
        }
    }

    fn set_pipeline(&mut self, cmd: CommandList, pipeline: NativePipeline) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        match self.pipelines.get(&pipeline.0) {
            Some(vk_pipeline) => unsafe {
                self.device.cmd_bind_pipeline(
                    command_buffer,
                    vk_pipeline.bind_point,
                    vk_pipeline.pipeline,
                )
            },
            None => log::error!("Vulkan: unknown pipeline {:?}", pipeline),
        }
    }

    fn set_primitive_topology(&mut self, cmd: CommandList, topology: PrimitiveTopology) {
        if let Some(command_buffer) = self.command_buffer(cmd) {
            unsafe {
                self.device
                    .cmd_set_primitive_topology(command_buffer, convert::topology(topology))
            };
        }
    }

    fn set_constant_buffer(
        &mut self,
        cmd: CommandList,
        parameter: u32,
        buffer: NativeBuffer,
        offset: u64,
    ) {
        let Some((bind_point, signature)) = self.bound_signature(cmd) else {
            log::error!("Vulkan: constant buffer set without a binding signature");
            return;
        };
        let Some(group) = signature.desc.bind_group_of(parameter) else {
            log::error!(
                "Vulkan: parameter {} of '{}' is not a constant buffer",
                parameter,
                signature.desc.name
            );
            return;
        };
        let Some(vk_buffer) = self.buffers.get(&buffer.0) else {
            log::error!("Vulkan: unknown constant buffer {:?}", buffer);
            return;
        };
        let layout = signature.layout;
        let set_layout = signature.set_layouts[group as usize];
        let info = vk::DescriptorBufferInfo {
            buffer: vk_buffer.buffer,
            offset,
            range: vk_buffer
                .size
                .saturating_sub(offset)
                .min(self.max_uniform_range),
        };

        let Some(list) = self.command_lists.get_mut(&cmd.0) else {
            return;
        };
        let set = match allocate_transient_set(&self.device, &mut list.descriptor_pools, set_layout)
        {
            Ok(set) => set,
            Err(err) => {
                log::error!("Vulkan: can't allocate descriptor set: {}", err);
                return;
            }
        };
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&info));
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
            self.device.cmd_bind_descriptor_sets(
                list.command_buffer,
                bind_point,
                layout,
                group,
                &[set],
                &[],
            );
        }
    }

    fn set_push_constants(&mut self, cmd: CommandList, parameter: u32, values: &[u32]) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        let Some((_, signature)) = self.bound_signature(cmd) else {
            log::error!("Vulkan: push constants set without a binding signature");
            return;
        };
        let Some(offset) = signature.desc.push_constant_offset(parameter) else {
            log::error!(
                "Vulkan: parameter {} of '{}' is not a push constant",
                parameter,
                signature.desc.name
            );
            return;
        };
        unsafe {
            self.device.cmd_push_constants(
                command_buffer,
                signature.layout,
                signature.push_stages,
                offset,
                bytemuck::cast_slice(values),
            )
        };
    }

    fn set_descriptor_table(&mut self, cmd: CommandList, parameter: u32, base: DescriptorHandle) {
        let bound = self.command_lists.get(&cmd.0).and_then(|list| list.signature);
        let Some((bind_point, signature)) =
            bound.and_then(|(bind_point, id)| Some((bind_point, self.signatures.get(&id)?)))
        else {
            log::error!("Vulkan: descriptor table set without a binding signature");
            return;
        };
        let (Some(group), Some(RootParameter::DescriptorTable { ranges, .. })) = (
            signature.desc.bind_group_of(parameter),
            signature.desc.parameters.get(parameter as usize),
        ) else {
            log::error!(
                "Vulkan: parameter {} of '{}' is not a descriptor table",
                parameter,
                signature.desc.name
            );
            return;
        };
        let Some(heap) = self.heaps.get(&(base.cpu >> 32)) else {
            log::error!("Vulkan: descriptor handle {:?} points at no heap", base);
            return;
        };
        let layout = signature.layout;
        let set_layout = signature.set_layouts[group as usize];
        let Some(list) = self.command_lists.get_mut(&cmd.0) else {
            return;
        };
        let set = match allocate_transient_set(&self.device, &mut list.descriptor_pools, set_layout)
        {
            Ok(set) => set,
            Err(err) => {
                log::error!("Vulkan: can't allocate descriptor set: {}", err);
                return;
            }
        };

        let writer = DescriptorWriter {
            device: &self.device,
            buffers: &self.buffers,
            textures: &self.textures,
            samplers: &self.samplers,
        };
        let mut slot = base.index;
        for (binding, range) in ranges.iter().enumerate() {
            let skip = range.dimension == ResourceDimension::AccelerationStructure
                || (range.range_type == DescriptorRangeType::Sampler
                    && heap.kind != DescriptorHeapKind::Sampler);
            for element in 0..range.count {
                let view = heap.slots.get((slot + element) as usize).and_then(Option::as_ref);
                match view {
                    _ if skip => {}
                    Some(view) => {
                        if let Err(err) = writer.write(set, binding as u32, element, view) {
                            log::error!(
                                "Vulkan: can't bind {} slot {}: {}",
                                heap.kind.name(),
                                slot + element,
                                err
                            );
                        }
                    }
                    None => log::warn!(
                        "Vulkan: {} slot {} bound by '{}' was never written",
                        heap.kind.name(),
                        slot + element,
                        signature.desc.name
                    ),
                }
            }
            slot += range.count;
        }

        unsafe {
            self.device.cmd_bind_descriptor_sets(
                list.command_buffer,
                bind_point,
                layout,
                group,
                &[set],
                &[],
            )
        };
    }

    fn set_vertex_buffer(
        &mut self,
        cmd: CommandList,
        slot: u32,
        buffer: NativeBuffer,
        offset: u64,
        stride: u32,
    ) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        let Some(vk_buffer) = self.buffers.get(&buffer.0) else {
            log::error!("Vulkan: unknown vertex buffer {:?}", buffer);
            return;
        };
        unsafe {
            self.device.cmd_bind_vertex_buffers2(
                command_buffer,
                slot,
                &[vk_buffer.buffer],
                &[offset],
                None,
                Some(&[u64::from(stride)]),
            )
        };
    }

    fn set_index_buffer(
        &mut self,
        cmd: CommandList,
        buffer: NativeBuffer,
        offset: u64,
        format: IndexFormat,
    ) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        let Some(vk_buffer) = self.buffers.get(&buffer.0) else {
            log::error!("Vulkan: unknown index buffer {:?}", buffer);
            return;
        };
        unsafe {
            self.device.cmd_bind_index_buffer(
                command_buffer,
                vk_buffer.buffer,
                offset,
                convert::index_type(format),
            )
        };
    }

    fn draw(&mut self, cmd: CommandList, vertices: Range<u32>, instances: Range<u32>) {
        if let Some(command_buffer) = self.command_buffer(cmd) {
            unsafe {
                self.device.cmd_draw(
                    command_buffer,
                    vertices.end - vertices.start,
                    instances.end - instances.start,
                    vertices.start,
                    instances.start,
                )
            };
        }
    }

    fn draw_indexed(
        &mut self,
        cmd: CommandList,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) {
        if let Some(command_buffer) = self.command_buffer(cmd) {
            unsafe {
                self.device.cmd_draw_indexed(
                    command_buffer,
                    indices.end - indices.start,
                    instances.end - instances.start,
                    indices.start,
                    base_vertex,
                    instances.start,
                )
            };
        }
    }

    fn dispatch(&mut self, cmd: CommandList, x: u32, y: u32, z: u32) {
        if let Some(command_buffer) = self.command_buffer(cmd) {
            unsafe { self.device.cmd_dispatch(command_buffer, x, y, z) };
        }
    }

    fn copy_buffer_to_texture(
        &mut self,
        cmd: CommandList,
        source: NativeBuffer,
        layouts: &[SubresourceLayout],
        destination: NativeTexture,
    ) {
        let Some(command_buffer) = self.command_buffer(cmd) else {
            return;
        };
        self.initialize_texture(command_buffer, destination);
        let (Some(buffer), Some(texture)) = (
            self.buffers.get(&source.0),
            self.textures.get(&destination.0),
        ) else {
            log::error!(
                "Vulkan: copy between unknown resources {:?} -> {:?}",
                source,
                destination
            );
            return;
        };

        let bytes_per_pixel = u64::from(texture.format.bytes_per_pixel());
        let regions: Vec<_> = layouts
            .iter()
            .enumerate()
            .map(|(mip, layout)| {
                let width = (texture.width >> mip).max(1);
                let height = (texture.height >> mip).max(1);
                vk::BufferImageCopy {
                    buffer_offset: layout.offset,
                    buffer_row_length: (layout.row_pitch / bytes_per_pixel) as u32,
                    buffer_image_height: (layout.slice_pitch / layout.row_pitch.max(1)) as u32,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: convert::sampled_aspect(texture.format),
                        mip_level: mip as u32,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    },
                }
            })
            .collect();

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                command_buffer,
                buffer.buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            )
        };
    }

    fn command_list_queue(&self, cmd: CommandList) -> Option<QueueType> {
        self.command_lists.get(&cmd.0).map(|list| list.queue)
    }

    fn submit(&mut self, cmd: CommandList) -> BackendResult<FenceValue> {
        let list = self
            .command_lists
            .remove(&cmd.0)
            .ok_or(BackendError::InvalidHandle("command list"))?;
        unsafe { self.device.end_command_buffer(list.command_buffer) }
            .map_err(|e| BackendError::RecordingFailed(e.to_string()))?;

        let fence = self.submit_to_queue(list.queue, Some(list.command_buffer))?;
        log::trace!(
            "Vulkan: submitted '{}' on {:?}, fence {}",
            list.label,
            list.queue,
            fence
        );
        self.queues[queue_index(list.queue)]
            .in_flight
            .push(RetiredCommandList {
                command_buffer: list.command_buffer,
                descriptor_pools: list.descriptor_pools,
                fence,
            });
        Ok(FenceValue(fence))
    }

    fn signal(&mut self, queue: QueueType) -> BackendResult<FenceValue> {
        self.submit_to_queue(queue, None).map(FenceValue)
    }

    fn completed_fence_value(&self, queue: QueueType) -> FenceValue {
        let state = &self.queues[queue_index(queue)];
        match unsafe { self.device.get_semaphore_counter_value(state.timeline) } {
            Ok(value) => FenceValue(value),
            Err(e) => {
                log::error!("Vulkan: can't read {:?} queue fence: {}", queue, e);
                FenceValue(0)
            }
        }
    }

    fn wait_for_fence(&mut self, queue: QueueType, value: FenceValue) -> BackendResult<()> {
        let state = &self.queues[queue_index(queue)];
        if value.0 > state.last_signalled {
            return Err(BackendError::SubmitFailed(format!(
                "fence value {} was never signalled on {:?}",
                value.0, queue
            )));
        }

        let semaphores = [state.timeline];
        let values = [value.0];
        let wait = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait, u64::MAX) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            e => BackendError::SubmitFailed(e.to_string()),
        })?;

        self.reclaim(queue);
        Ok(())
    }
}

/// Shader modules alive for the duration of one pipeline compile
struct ShaderModules {
    modules: Vec<(vk::ShaderModule, vk::ShaderStageFlags, CString)>,
}

impl ShaderModules {
    fn create(device: &ash::Device, shaders: &[&ShaderBytecode]) -> Result<Self, String> {
        let mut modules = Self {
            modules: Vec::new(),
        };
        for shader in shaders {
            let result = Self::create_module(device, shader);
            match result {
                Ok(module) => modules.modules.push(module),
                Err(e) => {
                    modules.destroy(device);
                    return Err(e);
                }
            }
        }
        Ok(modules)
    }

    fn create_module(
        device: &ash::Device,
        shader: &ShaderBytecode,
    ) -> Result<(vk::ShaderModule, vk::ShaderStageFlags, CString), String> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(shader.bytes()))
            .map_err(|e| format!("invalid SPIR-V for {:?}: {}", shader.stage, e))?;
        let entry = CString::new(shader.entry_point.as_str()).map_err(|e| e.to_string())?;
        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.create_shader_module(&info, None) }.map_err(|e| e.to_string())?;
        Ok((module, convert::shader_stage(shader.stage), entry))
    }

    fn stage_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo<'_>> {
        self.modules
            .iter()
            .map(|(module, stage, entry)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(*module)
                    .name(entry.as_c_str())
            })
            .collect()
    }

    fn destroy(&self, device: &ash::Device) {
        for (module, _, _) in &self.modules {
            unsafe { device.destroy_shader_module(*module, None) };
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            for state in &mut self.queues {
                for list in state.in_flight.drain(..) {
                    for pool in list.descriptor_pools {
                        self.device.destroy_descriptor_pool(pool, None);
                    }
                }
            }
            for (_, list) in self.command_lists.drain() {
                for pool in list.descriptor_pools {
                    self.device.destroy_descriptor_pool(pool, None);
                }
            }

            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
            }
            for (_, signature) in self.signatures.drain() {
                self.device.destroy_pipeline_layout(signature.layout, None);
                for layout in signature.set_layouts {
                    self.device.destroy_descriptor_set_layout(layout, None);
                }
            }
            self.device.destroy_descriptor_pool(self.static_pool, None);
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }

            // Free all allocations before the allocator goes
            if let Some(ref allocator) = self.allocator {
                for (_, buffer) in self.buffers.drain() {
                    self.device.destroy_buffer(buffer.buffer, None);
                    let _ = allocator.lock().free(buffer.allocation);
                }
                for (_, texture) in self.textures.drain() {
                    if texture.attachment_view != texture.view {
                        self.device.destroy_image_view(texture.attachment_view, None);
                    }
                    self.device.destroy_image_view(texture.view, None);
                    self.device.destroy_image(texture.image, None);
                    let _ = allocator.lock().free(texture.allocation);
                }
            }
            drop(self.allocator.take());

            for state in &self.queues {
                self.device.destroy_command_pool(state.command_pool, None);
                self.device.destroy_semaphore(state.timeline, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
